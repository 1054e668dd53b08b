use std::path::{Path, PathBuf};

use rusqlite::{Connection, params_from_iter, types::Value as SqlValue};

use crate::sql::{ColumnMeta, SqlError, SqlHandle, quote_identifier};

impl From<rusqlite::Error> for SqlError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, message) => SqlError {
                code: Some(failure.extended_code),
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            },
            _ => SqlError::new(error.to_string()),
        }
    }
}

/// `SqlHandle` over a `rusqlite::Connection`. Statements go through the
/// connection's statement cache, so re-preparing the same INSERT is cheap.
pub struct RusqliteHandle {
    path: PathBuf,
    connection: Connection,
    statement: Option<String>,
    bindings: Vec<SqlValue>,
    changes: usize,
}

impl RusqliteHandle {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqlError> {
        let path = path.as_ref().to_path_buf();
        let connection = Connection::open(&path)?;
        Ok(Self {
            path,
            connection,
            statement: None,
            bindings: Vec::new(),
            changes: 0,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn bind(&mut self, index: usize, value: SqlValue) {
        // Parameters are 1-based.
        let Some(slot) = index.checked_sub(1) else {
            return;
        };
        if self.bindings.len() <= slot {
            self.bindings.resize(slot + 1, SqlValue::Null);
        }
        self.bindings[slot] = value;
    }
}

impl SqlHandle for RusqliteHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        self.connection.execute_batch(sql)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<(), SqlError> {
        let parameters = self.connection.prepare_cached(sql)?.parameter_count();
        self.statement = Some(sql.to_string());
        self.bindings = vec![SqlValue::Null; parameters];
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.statement.is_some()
    }

    fn bind_integer(&mut self, index: usize, value: i64) {
        self.bind(index, SqlValue::Integer(value));
    }

    fn bind_double(&mut self, index: usize, value: f64) {
        self.bind(index, SqlValue::Real(value));
    }

    fn bind_text(&mut self, index: usize, value: &str) {
        self.bind(index, SqlValue::Text(value.to_string()));
    }

    fn bind_blob(&mut self, index: usize, value: &[u8]) {
        self.bind(index, SqlValue::Blob(value.to_vec()));
    }

    fn bind_null(&mut self, index: usize) {
        self.bind(index, SqlValue::Null);
    }

    fn step(&mut self) -> Result<(), SqlError> {
        let Some(sql) = &self.statement else {
            return Err(SqlError::new("no statement is prepared"));
        };
        let mut statement = self.connection.prepare_cached(sql)?;
        self.changes = statement.execute(params_from_iter(self.bindings.iter()))?;
        Ok(())
    }

    fn reset(&mut self) {
        self.bindings.fill(SqlValue::Null);
    }

    fn finalize(&mut self) {
        self.statement = None;
        self.bindings.clear();
    }

    fn changes(&self) -> usize {
        self.changes
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnMeta>, SqlError> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map([], |row| {
            Ok(ColumnMeta {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                pk: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn begin(&mut self) -> Result<(), SqlError> {
        self.execute("BEGIN IMMEDIATE")
    }

    fn commit(&mut self) -> Result<(), SqlError> {
        self.execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), SqlError> {
        self.execute("ROLLBACK")
    }

    fn is_in_transaction(&self) -> bool {
        !self.connection.is_autocommit()
    }
}
