pub mod pretty;

use std::io;
use thiserror::Error;
use types::Value;

/// Canonical error type shared across database subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("parse: {0}")]
    Parser(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("exec: {0}")]
    Executor(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// One row's values, interpreted under a schema.
///
/// A record only exists in memory; its on-disk form is the concatenation of
/// the field values at the offsets the schema declares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

/// Rectangular result set carrying column labels and rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
