//! Sandboxed condition language for branch edges and loop exit tests.
//!
//! A small boolean/comparison/arithmetic language evaluated against the run
//! context. Source text is parsed into a typed tree ([`Expr`]) once, then
//! interpreted per evaluation. The only names available are context keys:
//!
//! ```text
//! issues_open == 0
//! context.get('score', 0) >= 7 and 'urgent' not in labels
//! context['attempts'] < 3
//! ```

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use stepflow_types::graph::Context;
use thiserror::Error;

pub use ast::{ArithOp, CmpOp, CompiledExpr, Expr};
pub use eval::{truthy, values_equal};
pub use parser::parse;

/// Maximum accepted expression source length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Maximum nesting depth of parentheses, `not` and unary minus.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("disallowed construct: {0}")]
    Disallowed(String),

    #[error("expression is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("expression nesting exceeds {max} levels")]
    TooDeep { max: usize },

    #[error("missing context key '{0}'")]
    MissingKey(String),

    #[error("unsupported operand kinds for '{op}': {left} and {right}")]
    IncompatibleTypes {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic result is not a finite number")]
    NonFiniteNumber,
}

impl EvalError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        EvalError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// Parse and evaluate `expression` against `context`, returning its
/// truthiness.
pub fn evaluate(expression: &str, context: &Context) -> Result<bool, EvalError> {
    parse(expression)?.test(context)
}
