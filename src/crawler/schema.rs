use crate::{
    crawler::{CrawlOutcome, Crawler, CrawlerClient},
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{CorruptionReport, RepairError, Result},
        value::Value,
    },
};

pub const SCHEMA_ROOT_PAGE: PageNo = 1;
pub const SEQUENCE_TABLE: &str = "sqlite_sequence";

/// One row of `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub object_type: String,
    pub name: String,
    pub table_name: String,
    pub root_page: PageNo,
    pub sql: Option<String>,
}

impl SchemaObject {
    fn from_cell(cell: &Cell) -> Option<Self> {
        if cell.count() < 5 {
            return None;
        }
        let text = |index: usize| cell.value(index).as_text().map(str::to_string);
        let root_page = match cell.value(3) {
            Value::Integer(root) => PageNo::try_from(root).unwrap_or(0),
            _ => 0,
        };
        Some(Self {
            object_type: text(0)?,
            name: text(1)?,
            table_name: text(2)?,
            root_page,
            sql: text(4),
        })
    }

    pub fn is_table(&self) -> bool {
        self.object_type == "table"
    }

    /// The row defining the table itself, as opposed to an index or trigger on it.
    pub fn is_table_definition(&self) -> bool {
        self.is_table() && self.name == self.table_name
    }

    /// Objects owned by SQLite, recreated implicitly rather than replayed.
    pub fn is_reserved(&self) -> bool {
        self.table_name.starts_with("sqlite_")
    }

    pub fn is_sequence_table(&self) -> bool {
        self.is_table() && self.name == SEQUENCE_TABLE
    }
}

/// Collects `sqlite_master` by crawling page 1.
#[derive(Debug, Default)]
pub struct SchemaCrawler {
    objects: Vec<SchemaObject>,
    reports: Vec<CorruptionReport>,
    skipped_rows: usize,
}

impl SchemaCrawler {
    pub fn work(pager: &mut Pager, crawler: &mut Crawler) -> Result<Self> {
        let mut schema = Self::default();
        let outcome = crawler.crawl(pager, SCHEMA_ROOT_PAGE, &mut schema)?;
        if outcome == CrawlOutcome::Interrupted {
            return Err(RepairError::Interrupted);
        }
        Ok(schema)
    }

    pub fn objects(&self) -> &[SchemaObject] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<SchemaObject> {
        self.objects
    }

    pub fn reports(&self) -> &[CorruptionReport] {
        &self.reports
    }

    pub fn is_corrupted(&self) -> bool {
        !self.reports.is_empty()
    }

    /// Rows that decoded but did not look like schema rows.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn table(&self, name: &str) -> Option<&SchemaObject> {
        self.objects
            .iter()
            .find(|object| object.is_table_definition() && object.name == name)
    }
}

impl CrawlerClient for SchemaCrawler {
    fn on_cell_crawled(&mut self, cell: &Cell) {
        match SchemaObject::from_cell(cell) {
            Some(object) => self.objects.push(object),
            None => self.skipped_rows += 1,
        }
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        self.reports.push(report);
    }
}
