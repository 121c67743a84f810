//! Parser for the interactive command language.
//!
//! Statements fit on one line. `create table`, `drop table`, `insert into`
//! and `select` follow the grammar of §6 of the user help text; `help`,
//! `quit`, `show database`, `print` and `#` comments are line commands.

mod lexer;

pub use lexer::{tokenize, Token};

use common::{DbError, DbResult};
use types::{CompareOp, FieldType, Value};

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    /// `print text` echoes the rest of the line.
    Print(String),
    ShowDatabase,
    CreateTable {
        name: String,
        fields: Vec<(String, FieldType)>,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Select(SelectQuery),
}

/// The pieces of a `select` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub columns: Projection,
    pub from: String,
    pub join: Option<String>,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

/// A `where ATTR OP INT` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub attr: String,
    pub op: CompareOp,
    pub value: i32,
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> DbResult<Option<Command>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    // `print` echoes the raw rest of the line, so it must not be tokenized.
    if let Some(rest) = trimmed.strip_prefix("print") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Ok(Some(Command::Print(
                rest.strip_prefix(' ').unwrap_or(rest).to_string(),
            )));
        }
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser::new(tokens);
    let command = parser.command()?;
    Ok(Some(command))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn command(&mut self) -> DbResult<Command> {
        let command = match self.expect_ident("a command")?.as_str() {
            "help" => Command::Help,
            "quit" => Command::Quit,
            "show" => {
                self.expect_keyword("database")?;
                Command::ShowDatabase
            }
            "create" => self.create_table()?,
            "drop" => self.drop_table()?,
            "insert" => self.insert()?,
            "select" => self.select()?,
            other => {
                return Err(DbError::Parser(format!(
                    "there is an error near \"{}\"",
                    other
                )))
            }
        };
        self.expect_end()?;
        Ok(command)
    }

    fn create_table(&mut self) -> DbResult<Command> {
        self.expect_keyword("table")?;
        let name = self.expect_ident("a table name")?;
        self.expect(&Token::LParen)?;

        let mut fields = Vec::new();
        loop {
            let field_name = self.expect_ident("a field name")?;
            let ty = self.field_type()?;
            fields.push((field_name, ty));
            match self.next()? {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(DbError::Parser(format!(
                        "expected \",\" or \")\", found \"{}\"",
                        other
                    )))
                }
            }
        }
        if fields.is_empty() {
            return Err(DbError::Parser("create table: no fields given".into()));
        }
        self.accept(&Token::Semicolon);
        Ok(Command::CreateTable { name, fields })
    }

    fn field_type(&mut self) -> DbResult<FieldType> {
        let type_name = self.expect_ident("a field type")?;
        match type_name.as_str() {
            "int" => Ok(FieldType::Int),
            "str" => {
                self.expect(&Token::LBracket)?;
                let len = match self.next()? {
                    Token::Int(v) if v > 0 => v as usize,
                    other => {
                        return Err(DbError::Parser(format!(
                            "bad string length \"{}\"",
                            other
                        )))
                    }
                };
                self.expect(&Token::RBracket)?;
                Ok(FieldType::Str { len })
            }
            other => Err(DbError::Parser(format!("unknown type \"{}\"", other))),
        }
    }

    fn drop_table(&mut self) -> DbResult<Command> {
        self.expect_keyword("table")?;
        let name = self.expect_ident("a table name")?;
        self.expect(&Token::Semicolon)?;
        Ok(Command::DropTable { name })
    }

    fn insert(&mut self) -> DbResult<Command> {
        self.expect_keyword("into")?;
        let table = self.expect_ident("a table name")?;
        self.expect_keyword("values")?;
        self.expect(&Token::LParen)?;

        let mut values = Vec::new();
        loop {
            let value = match self.next()? {
                Token::Int(v) => Value::Int(int_in_range(v)?),
                Token::Str(s) => Value::Str(s),
                // Unquoted words are accepted as string values.
                Token::Ident(s) => Value::Str(s),
                other => {
                    return Err(DbError::Parser(format!(
                        "bad value \"{}\"",
                        other
                    )))
                }
            };
            values.push(value);
            match self.next()? {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(DbError::Parser(format!(
                        "expected \",\" or \")\", found \"{}\"",
                        other
                    )))
                }
            }
        }
        self.expect(&Token::Semicolon)?;
        Ok(Command::Insert { table, values })
    }

    fn select(&mut self) -> DbResult<Command> {
        let mut columns = Vec::new();
        let mut all = false;
        loop {
            match self.next()? {
                Token::Star => all = true,
                Token::Ident(name) if name != "from" => columns.push(name),
                Token::Ident(_) => {
                    return Err(DbError::Parser("select what?".into()));
                }
                other => {
                    return Err(DbError::Parser(format!(
                        "bad select list near \"{}\"",
                        other
                    )))
                }
            }
            match self.next()? {
                Token::Comma => continue,
                Token::Ident(kw) if kw == "from" => break,
                other => {
                    return Err(DbError::Parser(format!(
                        "expected \"from\", found \"{}\"",
                        other
                    )))
                }
            }
        }
        let from = self.expect_ident("a table name")?;

        let mut join = None;
        if self.accept_keyword("natural") {
            self.expect_keyword("join")?;
            join = Some(self.expect_ident("a table name")?);
        }

        let mut filter = None;
        if self.accept_keyword("where") {
            let attr = self.expect_ident("an attribute name")?;
            let op = match self.next()? {
                Token::Compare(op) => CompareOp::from_token(&op).ok_or_else(|| {
                    DbError::Parser(format!("unknown comparison operator \"{}\"", op))
                })?,
                other => {
                    return Err(DbError::Parser(format!(
                        "expected a comparison operator, found \"{}\"",
                        other
                    )))
                }
            };
            let value = match self.next()? {
                Token::Int(v) => int_in_range(v)?,
                other => {
                    return Err(DbError::Parser(format!(
                        "where clauses compare against integers, found \"{}\"",
                        other
                    )))
                }
            };
            filter = Some(Filter { attr, op, value });
        }
        self.expect(&Token::Semicolon)?;

        let columns = if all {
            Projection::All
        } else {
            Projection::Columns(columns)
        };
        Ok(Command::Select(SelectQuery {
            columns,
            from,
            join,
            filter,
        }))
    }

    fn next(&mut self) -> DbResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| DbError::Parser("unexpected end of statement".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, want: &Token) -> DbResult<()> {
        let token = self.next()?;
        if token != *want {
            return Err(DbError::Parser(format!(
                "expected \"{}\", found \"{}\"",
                want, token
            )));
        }
        Ok(())
    }

    /// Consume the token if it matches.
    fn accept(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn accept_keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(s)) if s == word => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_ident(&mut self, what: &str) -> DbResult<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(DbError::Parser(format!(
                "expected {}, found \"{}\"",
                what, other
            ))),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> DbResult<()> {
        let found = self.expect_ident(&format!("\"{}\"", word))?;
        if found != word {
            return Err(DbError::Parser(format!(
                "expected \"{}\", found \"{}\"",
                word, found
            )));
        }
        Ok(())
    }

    fn expect_end(&mut self) -> DbResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(DbError::Parser(format!(
                "there is an error near \"{}\"",
                token
            ))),
        }
    }
}

fn int_in_range(v: i64) -> DbResult<i32> {
    i32::try_from(v)
        .map_err(|_| DbError::Parser(format!("\"{}\" does not fit a 4-byte integer", v)))
}
