//! Recovery without a material: every table the schema still names is
//! crawled from its root, then every leaf no tree claims is matched to a
//! table by its column count.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    crawler::{
        CrawlOutcome, Crawler, CrawlerClient, SuspendFlag,
        schema::{SCHEMA_ROOT_PAGE, SchemaCrawler, SchemaObject},
        sequence::SequenceCrawler,
    },
    repair::{Progress, TableFilter, assembler::Assembler, score::Fraction},
    sql::{SqlHandle, parser::TableShape},
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{CorruptionReport, RepairError, Result},
        page::{Page, PageType},
    },
};

/// Crawler client that assembles every cell it is handed into the current
/// table and scores the leaves it sees.
pub(crate) struct TableAssembler<'c, 'p, H: SqlHandle> {
    assembler: &'c mut Assembler<H>,
    progress: &'c mut Progress<'p>,
    flag: SuspendFlag,
    pub(crate) fraction: Fraction,
    pub(crate) reports: Vec<CorruptionReport>,
    error: Option<RepairError>,
}

impl<'c, 'p, H: SqlHandle> TableAssembler<'c, 'p, H> {
    pub(crate) fn new(
        assembler: &'c mut Assembler<H>,
        progress: &'c mut Progress<'p>,
        flag: SuspendFlag,
    ) -> Self {
        Self {
            assembler,
            progress,
            flag,
            fraction: Fraction::default(),
            reports: Vec::new(),
            error: None,
        }
    }

    /// The assembly failure that stopped the crawl, if any.
    pub(crate) fn take_error(&mut self) -> Option<RepairError> {
        self.error.take()
    }
}

impl<H: SqlHandle> CrawlerClient for TableAssembler<'_, '_, H> {
    fn on_cell_crawled(&mut self, cell: &Cell) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = self.assembler.assemble_cell(cell) {
            self.error = Some(error);
            self.flag.suspend();
        }
    }

    fn will_crawl_page(&mut self, _page: &Page, _depth: usize) -> bool {
        if !self.progress.advance(1) {
            self.flag.suspend();
            return false;
        }
        true
    }

    fn on_page_crawled(&mut self, _page: &Page) {
        self.fraction.decoded += 1;
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        self.fraction.corrupted += 1;
        self.reports.push(report);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FullCrawlReport {
    pub score: Fraction,
    pub table_scores: BTreeMap<String, Fraction>,
    pub corruptions: Vec<CorruptionReport>,
    /// Leaves outside every known tree that were matched to a table.
    pub orphan_pages: usize,
    pub total_pages: u32,
}

#[derive(Debug)]
struct Candidate {
    sql: String,
    root: Option<PageNo>,
    column_count: Option<usize>,
    associated_sqls: Vec<String>,
}

pub struct FullCrawler<'a> {
    filter: Option<Arc<TableFilter>>,
    only_tables: Option<BTreeSet<String>>,
    known_sqls: BTreeMap<String, String>,
    flag: SuspendFlag,
    progress: Progress<'a>,
}

impl Default for FullCrawler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FullCrawler<'a> {
    pub fn new() -> Self {
        Self {
            filter: None,
            only_tables: None,
            known_sqls: BTreeMap::new(),
            flag: SuspendFlag::new(),
            progress: Progress::silent(),
        }
    }

    pub fn with_filter(mut self, filter: Option<Arc<TableFilter>>) -> Self {
        self.filter = filter;
        self
    }

    /// Restrict recovery to `tables`.
    pub fn only_tables(mut self, tables: BTreeSet<String>) -> Self {
        self.only_tables = Some(tables);
        self
    }

    /// CREATE statements for tables the on-disk schema may no longer name.
    pub fn with_known_sqls(mut self, sqls: BTreeMap<String, String>) -> Self {
        self.known_sqls = sqls;
        self
    }

    pub fn with_flag(mut self, flag: SuspendFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = progress;
        self
    }

    pub fn suspend_flag(&self) -> &SuspendFlag {
        &self.flag
    }

    fn accepts(&self, table: &str) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(table))
            && self
                .only_tables
                .as_ref()
                .is_none_or(|tables| tables.contains(table))
    }

    pub fn work<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
    ) -> Result<FullCrawlReport> {
        let total_pages = pager.number_of_pages();
        self.progress.reset(u64::from(total_pages));
        let mut report = FullCrawlReport {
            total_pages,
            ..FullCrawlReport::default()
        };
        let mut crawler = Crawler::with_flag(self.flag.clone());

        let schema = SchemaCrawler::work(pager, &mut crawler)?;
        report.corruptions.extend(schema.reports().iter().cloned());
        let mut candidates = self.candidates(schema.objects());

        let claimed = claim_pages(pager, schema.objects());
        let freelist = pager.freelist_pages();

        for (name, candidate) in &candidates {
            assembler.assemble_table(name, &candidate.sql)?;
            let Some(root) = candidate.root else {
                continue;
            };
            let mut client = TableAssembler::new(assembler, &mut self.progress, self.flag.clone());
            let outcome = crawler.crawl(pager, root, &mut client)?;
            if let Some(error) = client.take_error() {
                return Err(error);
            }
            if outcome == CrawlOutcome::Interrupted {
                return Err(RepairError::Interrupted);
            }
            *report.table_scores.entry(name.clone()).or_default() += client.fraction;
            report.corruptions.append(&mut client.reports);
        }

        self.crawl_orphans(pager, assembler, &candidates, &claimed, &freelist, &mut report)?;

        for (name, candidate) in candidates.iter_mut() {
            for sql in candidate.associated_sqls.drain(..) {
                if let Err(error) = assembler.assemble_sql(&sql) {
                    warn!(table = %name, error = %error, "failed to replay associated sql");
                }
            }
        }

        if let Some(sequence) = schema.objects().iter().find(|object| object.is_sequence_table()) {
            match SequenceCrawler::work(pager, &mut crawler, sequence.root_page) {
                Ok(sequences) => {
                    for (name, value) in sequences.sequences() {
                        if candidates.contains_key(name) {
                            assembler.assemble_sequence(name, *value)?;
                        }
                    }
                }
                Err(RepairError::Interrupted) => return Err(RepairError::Interrupted),
                Err(error) if error.is_corruption() => {
                    warn!(error = %error, "sequences lost");
                }
                Err(error) => return Err(error),
            }
        }

        self.progress.finish();
        for fraction in report.table_scores.values() {
            report.score += *fraction;
        }
        info!(
            path = %pager.path().display(),
            score = report.score.value(),
            tables = report.table_scores.len(),
            orphans = report.orphan_pages,
            corruptions = report.corruptions.len(),
            "full crawl finished"
        );
        Ok(report)
    }

    fn candidates(&self, objects: &[SchemaObject]) -> BTreeMap<String, Candidate> {
        let mut candidates = BTreeMap::new();
        for object in objects {
            if !object.is_table_definition() || object.is_reserved() || !self.accepts(&object.name) {
                continue;
            }
            let Some(sql) = &object.sql else {
                continue;
            };
            let shape = TableShape::parse(sql);
            if object.root_page == 0 || shape.as_ref().is_some_and(|shape| shape.without_rowid) {
                continue;
            }
            candidates.insert(
                object.name.clone(),
                Candidate {
                    sql: sql.clone(),
                    root: Some(object.root_page),
                    column_count: shape.map(|shape| shape.column_count()),
                    associated_sqls: Vec::new(),
                },
            );
        }

        for (name, sql) in &self.known_sqls {
            if candidates.contains_key(name) || !self.accepts(name) {
                continue;
            }
            let shape = TableShape::parse(sql);
            if shape.as_ref().is_some_and(|shape| shape.without_rowid) {
                continue;
            }
            debug!(table = %name, "table known only from its sql");
            candidates.insert(
                name.clone(),
                Candidate {
                    sql: sql.clone(),
                    root: None,
                    column_count: shape.map(|shape| shape.column_count()),
                    associated_sqls: Vec::new(),
                },
            );
        }

        for object in objects {
            if object.is_table_definition() {
                continue;
            }
            if let (Some(candidate), Some(sql)) =
                (candidates.get_mut(&object.table_name), &object.sql)
            {
                candidate.associated_sqls.push(sql.clone());
            }
        }
        candidates
    }

    /// Assemble leaves no tree reaches, when their column count names
    /// exactly one candidate.
    fn crawl_orphans<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
        candidates: &BTreeMap<String, Candidate>,
        claimed: &HashSet<PageNo>,
        freelist: &BTreeSet<PageNo>,
        report: &mut FullCrawlReport,
    ) -> Result<()> {
        for page_no in 1..=report.total_pages {
            if claimed.contains(&page_no) || freelist.contains(&page_no) {
                continue;
            }
            if self.flag.is_suspended() || !self.progress.advance(1) {
                self.flag.suspend();
                return Err(RepairError::Interrupted);
            }
            let page = match Page::decode(pager, page_no) {
                Ok(page) if page.page_type() == PageType::LeafTable => page,
                Ok(_) => continue,
                Err(error) if error.is_corruption() => continue,
                Err(error) => return Err(error),
            };

            let mut cells = Vec::with_capacity(page.cell_count());
            let mut failure = None;
            for &offset in page.cell_offsets() {
                match Cell::decode(pager, &page, offset) {
                    Ok(cell) => cells.push(cell),
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
            let Some(column_count) = cells.first().map(Cell::count) else {
                continue;
            };
            let mut matches = candidates
                .iter()
                .filter(|(_, candidate)| candidate.column_count == Some(column_count));
            let (Some((name, candidate)), None) = (matches.next(), matches.next()) else {
                debug!(page = page_no, column_count, "orphan leaf matches no single table");
                continue;
            };

            assembler.assemble_table(name, &candidate.sql)?;
            for cell in &cells {
                assembler.assemble_cell(cell)?;
            }
            report.orphan_pages += 1;
            let fraction = report.table_scores.entry(name.clone()).or_default();
            match failure {
                None => fraction.decoded += 1,
                Some(error) => match error.as_report() {
                    Some(corruption) => {
                        fraction.corrupted += 1;
                        report.corruptions.push(corruption);
                    }
                    None => return Err(error),
                },
            }
        }
        Ok(())
    }
}

/// Every page reachable from any root in the schema, damaged or not.
fn claim_pages(pager: &mut Pager, objects: &[SchemaObject]) -> HashSet<PageNo> {
    let page_count = pager.number_of_pages();
    let mut claimed = HashSet::new();
    let mut stack: Vec<PageNo> = objects
        .iter()
        .map(|object| object.root_page)
        .chain([SCHEMA_ROOT_PAGE])
        .collect();

    while let Some(page_no) = stack.pop() {
        if page_no == 0 || page_no > page_count || !claimed.insert(page_no) {
            continue;
        }
        let Ok(page) = Page::decode(pager, page_no) else {
            continue;
        };
        if let Ok(children) = page.child_page_numbers() {
            stack.extend(children);
        }
    }
    claimed
}
