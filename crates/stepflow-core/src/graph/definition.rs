//! Parsing graph definitions from JSON and YAML.

use std::path::Path;

use stepflow_types::graph::GraphDefinition;
use thiserror::Error;

use super::validate::ValidationError;

/// Errors from reading or parsing a graph definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// File extension is neither JSON nor YAML.
    #[error("unsupported graph file extension: '{0}'")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid graph: {0}")]
    Invalid(#[from] ValidationError),
}

pub fn parse_graph_json(json: &str) -> Result<GraphDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn parse_graph_yaml(yaml: &str) -> Result<GraphDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn serialize_graph_yaml(def: &GraphDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Read a graph definition from disk, choosing the format by extension
/// (`.json`, `.yaml`, `.yml`).
pub fn load_graph_file(path: &Path) -> Result<GraphDefinition, DefinitionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let content = std::fs::read_to_string(path)?;
    match ext.as_str() {
        "json" => parse_graph_json(&content),
        "yaml" | "yml" => parse_graph_yaml(&content),
        other => Err(DefinitionError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::graph::EdgeType;

    const YAML: &str = r#"
id: triage
name: Triage
start_node: intake
nodes:
  - id: intake
    callable: tools.noop
  - id: escalate
    callable: tools.approve
edges:
  - from: intake
    to: escalate
    type: branch
    condition:
      expression: "severity >= 3"
"#;

    #[test]
    fn test_parse_yaml() {
        let def = parse_graph_yaml(YAML).unwrap();
        assert_eq!(def.id, "triage");
        assert_eq!(def.edges[0].edge_type, EdgeType::Branch);
    }

    #[test]
    fn test_yaml_roundtrip_preserves_definition() {
        let def = parse_graph_yaml(YAML).unwrap();
        let yaml = serialize_graph_yaml(&def).unwrap();
        assert_eq!(parse_graph_yaml(&yaml).unwrap(), def);
    }

    #[test]
    fn test_parse_json_error() {
        let err = parse_graph_json("{\"id\": 1}").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_load_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("triage.yml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(load_graph_file(&yaml_path).unwrap().id, "triage");

        let json_path = dir.path().join("triage.json");
        let def = parse_graph_yaml(YAML).unwrap();
        std::fs::write(&json_path, serde_json::to_string(&def).unwrap()).unwrap();
        assert_eq!(load_graph_file(&json_path).unwrap(), def);

        let txt_path = dir.path().join("triage.txt");
        std::fs::write(&txt_path, YAML).unwrap();
        assert!(matches!(
            load_graph_file(&txt_path),
            Err(DefinitionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_graph_file(Path::new("/nonexistent/graph.json")).unwrap_err();
        assert!(matches!(err, DefinitionError::Io(_)));
    }
}
