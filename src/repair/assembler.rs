//! Replays recovered rows into a fresh database through ordinary INSERTs.

use tracing::{debug, warn};

use crate::{
    crawler::schema::SEQUENCE_TABLE,
    sql::{ColumnMeta, SqlError, SqlHandle, quote_identifier},
    types::{
        cell::Cell,
        error::{RepairError, Result},
        value::Value,
    },
};

/// Created so that `sqlite_sequence` exists in the target, dropped at the end.
const DUMMY_SEQUENCE_TABLE: &str = "salvage_dummy_sequence";

/// SQLITE_CONSTRAINT, the primary result code for UNIQUE and NOT NULL failures.
const CONSTRAINT_CODE: i32 = 19;

#[derive(Debug)]
struct InsertTarget {
    column_count: usize,
    rowid_alias: Option<usize>,
}

pub struct Assembler<H: SqlHandle> {
    handle: H,
    table: Option<String>,
    target: Option<InsertTarget>,
    duplicated_ignorable: bool,
    milestone_interval: usize,
    cells_since_milestone: usize,
    assembled_cells: usize,
    skipped_cells: usize,
}

impl<H: SqlHandle> Assembler<H> {
    pub fn new(handle: H, milestone_interval: usize) -> Self {
        Self {
            handle,
            table: None,
            target: None,
            duplicated_ignorable: false,
            milestone_interval: milestone_interval.max(1),
            cells_since_milestone: 0,
            assembled_cells: 0,
            skipped_cells: 0,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn into_handle(self) -> H {
        self.handle
    }

    pub fn assembled_cells(&self) -> usize {
        self.assembled_cells
    }

    /// Rows the target refused on a constraint.
    pub fn skipped_cells(&self) -> usize {
        self.skipped_cells
    }

    /// Insert with `OR IGNORE`, so rows already assembled from an earlier
    /// source win.
    pub fn mark_duplicated_as_ignorable(&mut self, ignorable: bool) {
        if self.duplicated_ignorable != ignorable {
            self.duplicated_ignorable = ignorable;
            self.finalize_insert();
        }
    }

    pub fn mark_as_assembling(&mut self) -> Result<()> {
        self.handle.execute("PRAGMA journal_mode=OFF")?;
        self.execute_ignoring_existence(&format!(
            "CREATE TABLE IF NOT EXISTS {}(i INTEGER PRIMARY KEY AUTOINCREMENT)",
            quote_identifier(DUMMY_SEQUENCE_TABLE)
        ))?;
        self.handle.begin()?;
        Ok(())
    }

    /// Commit what has been assembled so far and open a new transaction.
    pub fn mark_as_milestone(&mut self) -> Result<()> {
        self.finalize_insert();
        if self.handle.is_in_transaction() {
            self.handle.commit()?;
        }
        self.handle.begin()?;
        self.cells_since_milestone = 0;
        Ok(())
    }

    pub fn mark_as_assembled(&mut self) -> Result<()> {
        self.finalize_insert();
        self.table = None;
        if self.handle.is_in_transaction() {
            self.handle.commit()?;
        }
        self.handle.execute(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_identifier(DUMMY_SEQUENCE_TABLE)
        ))?;
        self.handle.execute("PRAGMA journal_mode=DELETE")?;
        debug!(
            path = %self.handle.path().display(),
            cells = self.assembled_cells,
            skipped = self.skipped_cells,
            "assembled"
        );
        Ok(())
    }

    pub fn assemble_table(&mut self, name: &str, sql: &str) -> Result<()> {
        self.finalize_insert();
        self.table = None;
        self.execute_ignoring_existence(sql)?;
        self.table = Some(name.to_string());
        Ok(())
    }

    /// Index, trigger or view SQL belonging to an assembled table.
    pub fn assemble_sql(&mut self, sql: &str) -> Result<()> {
        self.finalize_insert();
        self.execute_ignoring_existence(sql)
    }

    /// # Panics
    ///
    /// When no table has been assembled yet; every caller assembles the
    /// table before its cells.
    pub fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        let Some(table) = self.table.clone() else {
            panic!("assemble_cell called before assemble_table");
        };
        if self.target.is_none() || !self.handle.is_prepared() {
            self.prepare_insert(&table)?;
        }
        let Some(target) = &self.target else {
            return Err(SqlError::new(format!("no insert prepared for {}", table)).into());
        };

        self.handle.bind_integer(1, cell.row_id());
        for index in 0..target.column_count {
            let parameter = index + 2;
            match cell.value(index) {
                Value::Null if target.rowid_alias == Some(index) => {
                    self.handle.bind_integer(parameter, cell.row_id())
                }
                Value::Null => self.handle.bind_null(parameter),
                Value::Integer(value) => self.handle.bind_integer(parameter, value),
                Value::Real(value) => self.handle.bind_double(parameter, value),
                Value::Text(value) => self.handle.bind_text(parameter, &value),
                Value::Blob(value) => self.handle.bind_blob(parameter, &value),
            }
        }

        let result = self.handle.step();
        self.handle.reset();
        match result {
            Ok(()) => self.assembled_cells += 1,
            Err(error) if error.code.is_some_and(|code| code & 0xff == CONSTRAINT_CODE) => {
                warn!(
                    table = %table,
                    rowid = cell.row_id(),
                    page = cell.page_number(),
                    error = %error,
                    "skipping conflicting row"
                );
                self.skipped_cells += 1;
            }
            Err(error) => return Err(error.into()),
        }

        self.cells_since_milestone += 1;
        if self.cells_since_milestone >= self.milestone_interval {
            self.mark_as_milestone()?;
        }
        Ok(())
    }

    /// Raise the table's AUTOINCREMENT counter to at least `sequence`.
    pub fn assemble_sequence(&mut self, name: &str, sequence: i64) -> Result<()> {
        self.finalize_insert();
        let sequence_table = quote_identifier(SEQUENCE_TABLE);

        self.handle.prepare(&format!(
            "UPDATE {} SET seq = MAX(seq, ?1) WHERE name = ?2",
            sequence_table
        ))?;
        self.handle.bind_integer(1, sequence);
        self.handle.bind_text(2, name);
        self.handle.step()?;
        let updated = self.handle.changes() > 0;

        if !updated {
            self.handle.prepare(&format!(
                "INSERT INTO {}(name, seq) VALUES(?1, ?2)",
                sequence_table
            ))?;
            self.handle.bind_text(1, name);
            self.handle.bind_integer(2, sequence);
            self.handle.step()?;
        }
        self.handle.finalize();
        Ok(())
    }

    fn prepare_insert(&mut self, table: &str) -> Result<()> {
        let columns = self.handle.table_columns(table)?;
        if columns.is_empty() {
            return Err(RepairError::Sql(SqlError::new(format!(
                "table {} has no columns in the target",
                table
            ))));
        }
        let rowid_alias = rowid_alias(&columns);

        let names: Vec<String> = columns
            .iter()
            .map(|column| quote_identifier(&column.name))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len() + 1)
            .map(|index| format!("?{}", index))
            .collect();
        let sql = format!(
            "INSERT {}INTO {}(rowid, {}) VALUES({})",
            if self.duplicated_ignorable { "OR IGNORE " } else { "" },
            quote_identifier(table),
            names.join(", "),
            placeholders.join(", ")
        );
        self.handle.prepare(&sql)?;
        self.target = Some(InsertTarget {
            column_count: columns.len(),
            rowid_alias,
        });
        Ok(())
    }

    fn finalize_insert(&mut self) {
        if self.target.take().is_some() {
            self.handle.finalize();
        }
    }

    fn execute_ignoring_existence(&mut self, sql: &str) -> Result<()> {
        match self.handle.execute(sql) {
            Ok(()) => Ok(()),
            Err(error) if error.is_already_exists() => {
                debug!(sql, "already exists");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// The column aliasing the rowid: the sole primary-key column, declared
/// exactly `INTEGER`.
fn rowid_alias(columns: &[ColumnMeta]) -> Option<usize> {
    let max_pk = columns.iter().map(|column| column.pk).max().unwrap_or(0);
    if max_pk != 1 {
        return None;
    }
    let mut keys = columns.iter().enumerate().filter(|(_, column)| column.pk == 1);
    let (index, column) = keys.next()?;
    if keys.next().is_some() || !column.decl_type.eq_ignore_ascii_case("INTEGER") {
        return None;
    }
    Some(index)
}
