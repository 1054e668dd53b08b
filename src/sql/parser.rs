use sqlparser::{ast::Statement, dialect::SQLiteDialect, parser::Parser};

/// What a `CREATE TABLE` statement says about the rows stored for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<String>,
    pub without_rowid: bool,
}

impl TableShape {
    /// `None` for anything that is not a single plain `CREATE TABLE`.
    pub fn parse(sql: &str) -> Option<Self> {
        let dialect = SQLiteDialect {};
        let statements = Parser::parse_sql(&dialect, sql).ok()?;
        let [Statement::CreateTable(create)] = statements.as_slice() else {
            return None;
        };
        Some(Self {
            name: create.name.to_string(),
            columns: create
                .columns
                .iter()
                .map(|column| column.name.value.clone())
                .collect(),
            without_rowid: create.without_rowid,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}
