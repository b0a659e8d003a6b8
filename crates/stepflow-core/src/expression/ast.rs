//! Typed expression tree produced by the parser.

use serde_json::Value;

/// A parsed condition expression.
///
/// Evaluation is a pure function of the tree and the context; see
/// [`Expr::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `context.get(key[, default])` or a bare identifier.
    Lookup {
        key: Box<Expr>,
        default: Option<Box<Expr>>,
    },
    /// `context[key]`; a missing key is an error.
    Index(Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `first op1 e1 op2 e2 ...`, evaluated pairwise like `a < b < c`.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        };
        write!(f, "{s}")
    }
}

/// An expression parsed once and kept alongside its source text.
///
/// Stored on validated edges so a run never re-parses a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    expr: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, super::EvalError> {
        Ok(Self {
            source: source.to_string(),
            expr: super::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against `context` and reduce to truthiness.
    pub fn test(&self, context: &stepflow_types::graph::Context) -> Result<bool, super::EvalError> {
        self.expr.test(context)
    }
}
