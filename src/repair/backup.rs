use std::{collections::BTreeMap, path::Path, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    crawler::{
        CrawlOutcome, Crawler, CrawlerClient, SuspendFlag,
        schema::{SchemaCrawler, SchemaObject},
        sequence::SequenceCrawler,
    },
    material::{Content, Info, Material},
    repair::{TableFilter, locks::BackupLocks},
    sql::parser::TableShape,
    storage::pager::{Pager, PagerConfig},
    types::{
        PageNo,
        cell::Cell,
        error::{CorruptionReport, RepairError, Result},
        page::Page,
    },
};

/// Records the hash of every leaf that decoded cleanly.
#[derive(Debug, Default)]
struct VerifiedPages {
    pages: BTreeMap<PageNo, u32>,
    reports: Vec<CorruptionReport>,
}

impl CrawlerClient for VerifiedPages {
    fn on_cell_crawled(&mut self, _cell: &Cell) {}

    fn on_page_crawled(&mut self, page: &Page) {
        self.pages.insert(page.number(), page.hash());
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        self.reports.push(report);
    }
}

/// Produces a [`Material`] from a database that is still healthy enough to
/// crawl from its schema.
pub struct Backup {
    config: PagerConfig,
    filter: Option<Arc<TableFilter>>,
    flag: SuspendFlag,
    skipped_tables: Vec<String>,
}

impl Backup {
    pub fn new(config: PagerConfig) -> Self {
        Self {
            config,
            filter: None,
            flag: SuspendFlag::new(),
            skipped_tables: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Arc<TableFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn suspend_flag(&self) -> &SuspendFlag {
        &self.flag
    }

    /// Tables left out of the last material because their tree is damaged.
    pub fn skipped_tables(&self) -> &[String] {
        &self.skipped_tables
    }

    fn accepts(&self, table: &str) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(table))
    }

    pub fn produce<P: AsRef<Path>>(
        &mut self,
        path: P,
        locks: &mut (dyn BackupLocks + '_),
    ) -> Result<Material> {
        let path = path.as_ref();
        self.skipped_tables.clear();

        locks.acquire_exclusive()?;
        let pager = Pager::open(path, self.config.clone());
        locks.release_exclusive();
        let mut pager = pager?;

        locks.acquire_shared()?;
        let result = self.crawl(&mut pager);
        locks.release_shared();

        let material = result?;
        info!(
            path = %path.display(),
            tables = material.contents.len(),
            pages = material.number_of_pages(),
            skipped = self.skipped_tables.len(),
            "backup produced"
        );
        Ok(material)
    }

    fn crawl(&mut self, pager: &mut Pager) -> Result<Material> {
        let mut material = Material::new(Info {
            page_size: pager.page_size(),
            reserved_bytes: pager.reserved_bytes(),
            wal_salt: pager.wal_salt(),
            wal_frame: pager.wal_frame_count(),
        });
        let mut crawler = Crawler::with_flag(self.flag.clone());

        let schema = SchemaCrawler::work(pager, &mut crawler)?;
        if let Some(report) = schema.reports().first() {
            return Err(RepairError::Corruption {
                page: report.page,
                field: report.field,
                detail: report.detail.clone(),
            });
        }

        let mut sequence_root = None;
        let mut associated: Vec<&SchemaObject> = Vec::new();
        for object in schema.objects() {
            if object.is_sequence_table() {
                sequence_root = Some(object.root_page);
                continue;
            }
            if object.is_reserved() || !self.accepts(&object.table_name) {
                continue;
            }
            let Some(sql) = &object.sql else {
                continue;
            };
            if !object.is_table_definition() {
                associated.push(object);
                continue;
            }
            if object.root_page == 0
                || TableShape::parse(sql).is_some_and(|shape| shape.without_rowid)
            {
                debug!(table = %object.name, "not a rowid table, skipped");
                continue;
            }

            let mut verified = VerifiedPages::default();
            match crawler.crawl(pager, object.root_page, &mut verified)? {
                CrawlOutcome::Completed if !verified.pages.is_empty() => {
                    material.contents.insert(
                        object.name.clone(),
                        Content {
                            sql: sql.clone(),
                            verified_pages: verified.pages,
                            ..Content::default()
                        },
                    );
                }
                CrawlOutcome::Interrupted => return Err(RepairError::Interrupted),
                _ => {
                    warn!(
                        table = %object.name,
                        corruptions = verified.reports.len(),
                        "table left out of material"
                    );
                    self.skipped_tables.push(object.name.clone());
                }
            }
        }

        for object in associated {
            if let (Some(content), Some(sql)) =
                (material.contents.get_mut(&object.table_name), &object.sql)
            {
                content.associated_sqls.push(sql.clone());
            }
        }

        if let Some(root) = sequence_root {
            let sequences = SequenceCrawler::work(pager, &mut crawler, root)?;
            for (name, sequence) in sequences.into_sequences() {
                if let Some(content) = material.contents.get_mut(&name) {
                    content.sequence = content.sequence.max(sequence);
                }
            }
        }
        Ok(material)
    }
}
