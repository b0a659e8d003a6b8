//! Tokenizer for the condition expression language.

use super::EvalError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Keywords
    And,
    Or,
    Not,
    In,
    True,
    False,
    None,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    // Operators
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,

    End,
}

impl TokenKind {
    /// Short description used in syntax error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(n) => n.to_string(),
            TokenKind::Float(f) => f.to_string(),
            TokenKind::Str(s) => format!("'{s}'"),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::And => "and".to_string(),
            TokenKind::Or => "or".to_string(),
            TokenKind::Not => "not".to_string(),
            TokenKind::In => "in".to_string(),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::None => "none".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::LBracket => "[".to_string(),
            TokenKind::RBracket => "]".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::Eq => "==".to_string(),
            TokenKind::NotEq => "!=".to_string(),
            TokenKind::Lt => "<".to_string(),
            TokenKind::LtEq => "<=".to_string(),
            TokenKind::Gt => ">".to_string(),
            TokenKind::GtEq => ">=".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::Assign => "=".to_string(),
            TokenKind::End => "end of expression".to_string(),
        }
    }
}

/// A token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split `source` into tokens, terminated by a single `End` token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let kind = match c {
            b'(' => single(&mut pos, TokenKind::LParen),
            b')' => single(&mut pos, TokenKind::RParen),
            b'[' => single(&mut pos, TokenKind::LBracket),
            b']' => single(&mut pos, TokenKind::RBracket),
            b',' => single(&mut pos, TokenKind::Comma),
            b'+' => single(&mut pos, TokenKind::Plus),
            b'-' => single(&mut pos, TokenKind::Minus),
            b'*' => single(&mut pos, TokenKind::Star),
            b'/' => single(&mut pos, TokenKind::Slash),
            b'%' => single(&mut pos, TokenKind::Percent),
            b'=' => pair(bytes, &mut pos, b'=', TokenKind::Eq, TokenKind::Assign),
            b'<' => pair(bytes, &mut pos, b'=', TokenKind::LtEq, TokenKind::Lt),
            b'>' => pair(bytes, &mut pos, b'=', TokenKind::GtEq, TokenKind::Gt),
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::NotEq
                } else {
                    return Err(EvalError::syntax(pos, "unexpected '!' (use 'not')"));
                }
            }
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                single(&mut pos, TokenKind::Dot)
            }
            b'\'' | b'"' => lex_string(source, &mut pos)?,
            b'0'..=b'9' | b'.' => lex_number(source, &mut pos)?,
            c if c.is_ascii_alphabetic() || c == b'_' => lex_word(source, &mut pos),
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(EvalError::syntax(pos, format!("unexpected character '{ch}'")));
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        offset: bytes.len(),
    });
    Ok(tokens)
}

fn single(pos: &mut usize, kind: TokenKind) -> TokenKind {
    *pos += 1;
    kind
}

fn pair(bytes: &[u8], pos: &mut usize, next: u8, long: TokenKind, short: TokenKind) -> TokenKind {
    if bytes.get(*pos + 1) == Some(&next) {
        *pos += 2;
        long
    } else {
        *pos += 1;
        short
    }
}

fn lex_string(source: &str, pos: &mut usize) -> Result<TokenKind, EvalError> {
    let start = *pos;
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars
        .next()
        .ok_or_else(|| EvalError::syntax(start, "unterminated string"))?;
    let mut out = String::new();

    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => {
                *pos = start + i + c.len_utf8();
                return Ok(TokenKind::Str(out));
            }
            '\\' => {
                let (j, escaped) = chars
                    .next()
                    .ok_or_else(|| EvalError::syntax(start, "unterminated string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' | '\'' | '"' => out.push(escaped),
                    other => {
                        return Err(EvalError::syntax(
                            start + j,
                            format!("unknown escape '\\{other}'"),
                        ));
                    }
                }
            }
            c => out.push(c),
        }
    }

    Err(EvalError::syntax(start, "unterminated string"))
}

fn lex_number(source: &str, pos: &mut usize) -> Result<TokenKind, EvalError> {
    let bytes = source.as_bytes();
    let start = *pos;
    let mut end = start;
    let mut is_float = false;

    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        if exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            is_float = true;
            end = exp_end;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }

    let text = &source[start..end];
    *pos = end;

    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(TokenKind::Int(n));
        }
    }
    text.parse::<f64>()
        .map(TokenKind::Float)
        .map_err(|_| EvalError::syntax(start, format!("invalid number '{text}'")))
}

fn lex_word(source: &str, pos: &mut usize) -> TokenKind {
    let bytes = source.as_bytes();
    let start = *pos;
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    *pos = end;

    match &source[start..end] {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "true" | "True" => TokenKind::True,
        "false" | "False" => TokenKind::False,
        "none" | "None" => TokenKind::None,
        word => TokenKind::Ident(word.to_string()),
    }
}
