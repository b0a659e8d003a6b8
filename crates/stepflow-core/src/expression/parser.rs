//! Recursive-descent parser for condition expressions.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparisons (chainable,
//! including `in` / `not in`), `+ -`, `* / %`, unary `-`, primaries.
//! Anything outside the grammar (calls, attribute access, assignment,
//! reserved words) is rejected here so it never reaches evaluation.

use serde_json::Value;

use super::ast::{ArithOp, CmpOp, Expr};
use super::lexer::{Token, TokenKind, tokenize};
use super::{EvalError, MAX_EXPRESSION_LEN, MAX_NESTING_DEPTH};

/// Names that could look like code execution. Rejected even though bare
/// identifiers are otherwise context lookups.
const RESERVED: &[&str] = &[
    "import", "lambda", "def", "class", "exec", "eval", "compile", "open", "globals",
    "locals", "getattr", "setattr", "delattr", "del", "for", "while", "if", "else", "is",
    "yield", "return", "async", "await",
];

/// Parse `source` into an expression tree.
pub fn parse(source: &str) -> Result<Expr, EvalError> {
    if source.len() > MAX_EXPRESSION_LEN {
        return Err(EvalError::TooLong {
            len: source.len(),
            max: MAX_EXPRESSION_LEN,
        });
    }

    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        TokenKind::End => Ok(expr),
        _ => Err(parser.unexpected()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), EvalError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(EvalError::syntax(
                self.offset(),
                format!(
                    "expected '{}', found '{}'",
                    kind.describe(),
                    self.peek().describe()
                ),
            ))
        }
    }

    /// Error for the current token, classifying constructs that are outside
    /// the language rather than merely misplaced.
    fn unexpected(&self) -> EvalError {
        match self.peek() {
            TokenKind::Dot => EvalError::Disallowed("attribute access".to_string()),
            TokenKind::LParen => EvalError::Disallowed("function call".to_string()),
            TokenKind::LBracket => EvalError::Disallowed("subscript".to_string()),
            TokenKind::Assign => EvalError::Disallowed("assignment".to_string()),
            TokenKind::End => EvalError::syntax(self.offset(), "unexpected end of expression"),
            other => EvalError::syntax(
                self.offset(),
                format!("unexpected '{}'", other.describe()),
            ),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(EvalError::TooDeep {
                max: MAX_NESTING_DEPTH,
            });
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&TokenKind::Not) {
            let inner = self.nested(Self::parse_not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();

        loop {
            let op = match self.peek() {
                TokenKind::Eq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::LtEq => CmpOp::LtEq,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::GtEq => CmpOp::GtEq,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if self.peek_at(1) == &TokenKind::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_additive()?));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => ArithOp::Add,
                TokenKind::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => ArithOp::Mul,
                TokenKind::Slash => ArithOp::Div,
                TokenKind::Percent => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Value::from(n)))
            }
            TokenKind::Float(f) => {
                self.advance();
                serde_json::Number::from_f64(f)
                    .map(|n| Expr::Literal(Value::Number(n)))
                    .ok_or_else(|| EvalError::syntax(self.offset(), "number out of range"))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.nested(Self::parse_or)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) if name == "context" => {
                self.advance();
                self.parse_context_access()
            }
            TokenKind::Ident(name) => {
                if RESERVED.contains(&name.as_str()) || name.starts_with("__") {
                    return Err(EvalError::Disallowed(format!("name '{name}'")));
                }
                self.advance();
                match self.peek() {
                    TokenKind::LParen => {
                        Err(EvalError::Disallowed(format!("function call '{name}(...)'")))
                    }
                    TokenKind::Dot => {
                        Err(EvalError::Disallowed(format!("attribute access on '{name}'")))
                    }
                    TokenKind::LBracket => {
                        Err(EvalError::Disallowed(format!("subscript on '{name}'")))
                    }
                    _ => Ok(Expr::Lookup {
                        key: Box::new(Expr::Literal(Value::String(name))),
                        default: None,
                    }),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    /// After `context`: either `.get(key[, default])` or `[key]`.
    fn parse_context_access(&mut self) -> Result<Expr, EvalError> {
        match self.peek().clone() {
            TokenKind::Dot => {
                self.advance();
                match self.advance() {
                    TokenKind::Ident(method) if method == "get" => {}
                    TokenKind::Ident(method) => {
                        return Err(EvalError::Disallowed(format!(
                            "attribute access 'context.{method}'"
                        )));
                    }
                    other => {
                        return Err(EvalError::syntax(
                            self.offset(),
                            format!("expected 'get' after 'context.', found '{}'", other.describe()),
                        ));
                    }
                }
                if self.peek() != &TokenKind::LParen {
                    return Err(EvalError::Disallowed(
                        "'context.get' must be called".to_string(),
                    ));
                }
                self.advance();
                let key = self.nested(Self::parse_or)?;
                let default = if self.eat(&TokenKind::Comma) {
                    Some(Box::new(self.nested(Self::parse_or)?))
                } else {
                    None
                };
                if self.peek() == &TokenKind::Comma {
                    return Err(EvalError::syntax(
                        self.offset(),
                        "context.get takes at most 2 arguments",
                    ));
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Lookup {
                    key: Box::new(key),
                    default,
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let key = self.nested(Self::parse_or)?;
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::Index(Box::new(key)))
            }
            _ => Err(EvalError::Disallowed(
                "'context' must be accessed with .get(...) or [...]".to_string(),
            )),
        }
    }
}
