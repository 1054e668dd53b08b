use std::{
    error::Error,
    fs::OpenOptions,
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use rusqlite::Connection;
use tempfile::TempDir;

use crate::{
    storage::pager::{Pager, PagerConfig},
    types::{PageNo, page::Page},
};

pub const MOCK_PAGE_SIZE: u32 = 4096;

/// A SQLite database in its own temporary directory, built through rusqlite
/// and damaged page by page for tests and benches.
pub struct TempDatabase {
    pub directory: TempDir,
    pub path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        Self::with_name("salvage_test.db")
    }

    pub fn with_name(name: &str) -> Result<Self, Box<dyn Error>> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join(name);
        let connection = Connection::open(&path)?;
        connection.execute_batch(&format!(
            "PRAGMA page_size={}; PRAGMA journal_mode=DELETE;",
            MOCK_PAGE_SIZE
        ))?;
        Ok(Self { directory, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> rusqlite::Result<Connection> {
        Connection::open(&self.path)
    }

    pub fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        self.connection()?.execute_batch(sql)
    }

    pub fn count_rows(&self, table: &str) -> rusqlite::Result<i64> {
        self.connection()?
            .query_row(&format!("SELECT count(*) FROM \"{}\"", table), [], |row| row.get(0))
    }

    pub fn table_root(&self, table: &str) -> rusqlite::Result<PageNo> {
        self.connection()?.query_row(
            "SELECT rootpage FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
    }

    /// Leaf pages of `table` in key order.
    pub fn leaf_pages(&self, table: &str) -> Result<Vec<PageNo>, Box<dyn Error>> {
        let root = self.table_root(table)?;
        let mut pager = Pager::open(&self.path, PagerConfig::default())?;
        let mut leaves = Vec::new();
        let mut stack = vec![root];
        while let Some(page_no) = stack.pop() {
            let page = Page::decode(&mut pager, page_no)?;
            if page.is_leaf() {
                leaves.push(page_no);
            } else {
                stack.extend(page.child_page_numbers()?.into_iter().rev());
            }
        }
        Ok(leaves)
    }

    /// Overwrite `bytes` at `offset` inside page `page_no`.
    pub fn write_page_bytes(&self, page_no: PageNo, offset: usize, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let position = u64::from(page_no - 1) * u64::from(MOCK_PAGE_SIZE) + offset as u64;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    pub fn zero_page(&self, page_no: PageNo) -> std::io::Result<()> {
        self.write_page_bytes(page_no, 0, &vec![0u8; MOCK_PAGE_SIZE as usize])
    }
}
