//! The SQL engine as seen by the assembler: one connection, one prepared
//! statement at a time.

pub mod parser;
pub mod rusqlite_handle;

use std::path::Path;

use thiserror::Error;

pub use rusqlite_handle::RusqliteHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code:?})")]
pub struct SqlError {
    /// Extended result code when the engine reported one.
    pub code: Option<i32>,
    pub message: String,
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// CREATE statements replayed against a target that already has the object.
    pub fn is_already_exists(&self) -> bool {
        self.message.contains("already exists")
    }
}

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub decl_type: String,
    /// 1-based rank within the primary key, 0 when not part of it.
    pub pk: i64,
}

pub trait SqlHandle {
    fn path(&self) -> &Path;

    fn execute(&mut self, sql: &str) -> Result<(), SqlError>;

    /// Replace the current statement. Bindings start out NULL.
    fn prepare(&mut self, sql: &str) -> Result<(), SqlError>;

    fn is_prepared(&self) -> bool;

    fn bind_integer(&mut self, index: usize, value: i64);

    fn bind_double(&mut self, index: usize, value: f64);

    fn bind_text(&mut self, index: usize, value: &str);

    fn bind_blob(&mut self, index: usize, value: &[u8]);

    fn bind_null(&mut self, index: usize);

    /// Run the current statement to completion with its bindings.
    fn step(&mut self) -> Result<(), SqlError>;

    /// Clear bindings so the statement can be stepped again.
    fn reset(&mut self);

    fn finalize(&mut self);

    /// Rows changed by the last `step`.
    fn changes(&self) -> usize;

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnMeta>, SqlError>;

    fn begin(&mut self) -> Result<(), SqlError>;

    fn commit(&mut self) -> Result<(), SqlError>;

    fn rollback(&mut self) -> Result<(), SqlError>;

    fn is_in_transaction(&self) -> bool;
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
