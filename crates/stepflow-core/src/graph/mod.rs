//! Graph model: parsing definitions and validating them into immutable,
//! typed graphs the engine can execute.

pub mod definition;
pub mod validate;

pub use definition::{
    DefinitionError, load_graph_file, parse_graph_json, parse_graph_yaml, serialize_graph_yaml,
};
pub use validate::{
    Condition, Edge, EdgeKind, GraphDiagnostic, Routes, ValidatedGraph, ValidationError,
    check_callables, validate, validate_with_callables,
};
