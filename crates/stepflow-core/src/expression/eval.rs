//! Pure interpreter over [`Expr`].
//!
//! Values are plain JSON values. The only name resolution is the context
//! mapping passed in; nothing here can reach host code.

use std::cmp::Ordering;

use serde_json::Value;
use stepflow_types::graph::Context;

use super::EvalError;
use super::ast::{ArithOp, CmpOp, Expr};

impl Expr {
    /// Evaluate to a JSON value.
    pub fn evaluate(&self, context: &Context) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Lookup { key, default } => {
                let key = key_string(key.evaluate(context)?)?;
                match context.get(&key) {
                    Some(value) => Ok(value.clone()),
                    None => match default {
                        Some(default) => default.evaluate(context),
                        None => Ok(Value::Null),
                    },
                }
            }
            Expr::Index(key) => {
                let key = key_string(key.evaluate(context)?)?;
                context
                    .get(&key)
                    .cloned()
                    .ok_or(EvalError::MissingKey(key))
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.evaluate(context)?))),
            Expr::Neg(inner) => {
                let value = inner.evaluate(context)?;
                match Num::from_value(&value) {
                    Some(Num::Int(i)) => Ok(match i.checked_neg() {
                        Some(n) => Value::from(n),
                        None => float_value(-(i as f64))?,
                    }),
                    Some(Num::Float(f)) => float_value(-f),
                    None => Err(EvalError::IncompatibleTypes {
                        op: "unary -".to_string(),
                        left: kind_name(&value),
                        right: kind_name(&value),
                    }),
                }
            }
            Expr::And(lhs, rhs) => {
                let left = lhs.evaluate(context)?;
                if truthy(&left) {
                    rhs.evaluate(context)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(lhs, rhs) => {
                let left = lhs.evaluate(context)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    rhs.evaluate(context)
                }
            }
            Expr::Compare { first, rest } => {
                let mut left = first.evaluate(context)?;
                for (op, rhs) in rest {
                    let right = rhs.evaluate(context)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Arith { op, lhs, rhs } => {
                let left = lhs.evaluate(context)?;
                let right = rhs.evaluate(context)?;
                arith(*op, &left, &right)
            }
        }
    }

    /// Evaluate and reduce to truthiness.
    pub fn test(&self, context: &Context) -> Result<bool, EvalError> {
        Ok(truthy(&self.evaluate(context)?))
    }
}

/// `none`, `false`, zero, and empty strings/arrays/objects are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Type name used in error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn key_string(key: Value) -> Result<String, EvalError> {
    match key {
        Value::String(s) => Ok(s),
        other => Err(EvalError::IncompatibleTypes {
            op: "context key".to_string(),
            left: kind_name(&other),
            right: "string",
        }),
    }
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Self> {
        let n = value.as_number()?;
        match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Float(f) => f == 0.0,
        }
    }

    fn cmp(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

fn float_value(f: f64) -> Result<Value, EvalError> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or(EvalError::NonFiniteNumber)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Equality that never fails: numbers compare by value, everything else
/// structurally, and different kinds are unequal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (Num::from_value(left), Num::from_value(right)) {
        (Some(a), Some(b)) => a.cmp(b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn ordering(op: CmpOp, left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    let incompatible = || EvalError::IncompatibleTypes {
        op: op.to_string(),
        left: kind_name(left),
        right: kind_name(right),
    };

    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Number(_), Value::Number(_)) => {
            match (Num::from_value(left), Num::from_value(right)) {
                (Some(a), Some(b)) => a.cmp(b).ok_or_else(incompatible),
                _ => Err(incompatible()),
            }
        }
        _ => Err(incompatible()),
    }
}

fn contains(op: CmpOp, needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    let incompatible = || EvalError::IncompatibleTypes {
        op: op.to_string(),
        left: kind_name(needle),
        right: kind_name(haystack),
    };

    match haystack {
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(incompatible()),
        },
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(needle, item))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Err(incompatible()),
        },
        _ => Err(incompatible()),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        CmpOp::Lt => ordering(op, left, right)? == Ordering::Less,
        CmpOp::LtEq => ordering(op, left, right)? != Ordering::Greater,
        CmpOp::Gt => ordering(op, left, right)? == Ordering::Greater,
        CmpOp::GtEq => ordering(op, left, right)? != Ordering::Less,
        CmpOp::In => contains(op, left, right)?,
        CmpOp::NotIn => !contains(op, left, right)?,
    })
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (ArithOp::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (a, b) = match (Num::from_value(left), Num::from_value(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::IncompatibleTypes {
                op: op.to_string(),
                left: kind_name(left),
                right: kind_name(right),
            });
        }
    };

    if matches!(op, ArithOp::Div | ArithOp::Mod) && b.is_zero() {
        return Err(EvalError::DivisionByZero);
    }

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Mod => x.checked_rem(y).map(|r| {
                if r != 0 && (r < 0) != (y < 0) { r + y } else { r }
            }),
            ArithOp::Div => None,
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => {
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
    };
    float_value(result)
}
