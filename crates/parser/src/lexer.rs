//! Tokenizer for the command language.

use common::{DbError, DbResult};

/// A single command token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: keyword, table or field name, or an unquoted value.
    Ident(String),
    /// Integer literal.
    Int(i64),
    /// Double-quoted string literal, quotes stripped.
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Star,
    /// One of `= < <= > >= != ==`.
    Compare(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Int(v) => write!(f, "{}", v),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Star => write!(f, "*"),
            Token::Compare(op) => write!(f, "{}", op),
        }
    }
}

/// Split a statement line into tokens.
pub fn tokenize(line: &str) -> DbResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => text.push(c),
                        None => {
                            return Err(DbError::Parser(
                                "unterminated string literal".into(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' | '<' | '>' | '!' => {
                chars.next();
                let mut op = String::from(c);
                if chars.peek() == Some(&'=') {
                    chars.next();
                    op.push('=');
                }
                if op == "!" {
                    return Err(DbError::Parser("there is an error near \"!\"".into()));
                }
                tokens.push(Token::Compare(op));
            }
            '-' => {
                chars.next();
                let digits = take_while(&mut chars, |c| c.is_ascii_digit());
                if digits.is_empty() {
                    return Err(DbError::Parser("there is an error near \"-\"".into()));
                }
                let value: i64 = format!("-{}", digits)
                    .parse()
                    .map_err(|_| DbError::Parser(format!("bad integer \"-{}\"", digits)))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_digit() => {
                let digits = take_while(&mut chars, |c| c.is_ascii_digit());
                let value: i64 = digits
                    .parse()
                    .map_err(|_| DbError::Parser(format!("bad integer \"{}\"", digits)))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let word = take_while(&mut chars, |c| c.is_alphanumeric() || c == '_');
                tokens.push(Token::Ident(word));
            }
            other => {
                return Err(DbError::Parser(format!(
                    "there is an error near \"{}\"",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

fn take_while(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    keep: impl Fn(char) -> bool,
) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}
