//! Recovery guided by a material: the recorded leaves of each table are
//! decoded directly, without trusting any interior page of the live file.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    crawler::SuspendFlag,
    material::{Content, Material},
    repair::{Progress, TableFilter, assembler::Assembler, full_crawler::FullCrawler, score::Fraction},
    sql::{SqlHandle, parser::TableShape},
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{CorruptField, CorruptionReport, RepairError, Result},
        page::{Page, PageType},
    },
    utils::hash::verify_page_hash,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MechanicReport {
    pub score: Fraction,
    pub table_scores: BTreeMap<String, Fraction>,
    pub corruptions: Vec<CorruptionReport>,
    /// Tables recovered by full crawl because their recorded pages changed.
    pub fallback_tables: Vec<String>,
    pub total_pages: usize,
    pub disposed_wal_pages: usize,
}

pub struct Mechanic<'a> {
    material: &'a Material,
    fallback_change_ratio: f64,
    filter: Option<Arc<TableFilter>>,
    flag: SuspendFlag,
    progress: Progress<'a>,
}

impl<'a> Mechanic<'a> {
    pub fn new(material: &'a Material, fallback_change_ratio: f64) -> Self {
        Self {
            material,
            fallback_change_ratio,
            filter: None,
            flag: SuspendFlag::new(),
            progress: Progress::silent(),
        }
    }

    pub fn with_filter(mut self, filter: Option<Arc<TableFilter>>) -> Self {
        self.filter = filter;
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

    pub fn work<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
    ) -> Result<MechanicReport> {
        let material = self.material;
        let mut report = MechanicReport {
            total_pages: material.number_of_pages(),
            ..MechanicReport::default()
        };
        self.progress.reset(report.total_pages as u64);

        for (name, content) in &material.contents {
            if self.filter.as_ref().is_some_and(|filter| !filter(name)) {
                continue;
            }
            if !self.is_plausible(pager, name, content)? {
                report.fallback_tables.push(name.clone());
                if !self.progress.advance(content.verified_pages.len() as u64) {
                    self.flag.suspend();
                    return Err(RepairError::Interrupted);
                }
                continue;
            }
            let fraction = self.assemble_table(pager, assembler, name, content, &mut report)?;
            debug!(table = %name, score = fraction.value(), "table assembled from material");
            report.table_scores.insert(name.clone(), fraction);
        }

        if !report.fallback_tables.is_empty() {
            self.fall_back(pager, assembler, &mut report)?;
        }

        for fraction in report.table_scores.values() {
            report.score += *fraction;
        }
        report.disposed_wal_pages = pager.disposed_wal_pages();
        self.progress.finish();
        info!(
            path = %pager.path().display(),
            score = report.score.value(),
            pages = report.total_pages,
            fallbacks = report.fallback_tables.len(),
            corruptions = report.corruptions.len(),
            "mechanic finished"
        );
        Ok(report)
    }

    /// The recorded pages still exist and mostly still hold what was backed up.
    fn is_plausible(&self, pager: &mut Pager, name: &str, content: &Content) -> Result<bool> {
        let page_count = pager.number_of_pages();
        if let Some(&page_no) = content
            .verified_pages
            .keys()
            .find(|&&page_no| page_no == 0 || page_no > page_count)
        {
            warn!(table = %name, page = page_no, page_count, "recorded page beyond the file");
            return Ok(false);
        }

        let mut changed = 0usize;
        for (&page_no, &hash) in &content.verified_pages {
            match pager.acquire_page_data(page_no) {
                Ok(data) if verify_page_hash(&data, hash) => {}
                Ok(_) => changed += 1,
                Err(error) if error.is_corruption() => changed += 1,
                Err(error) => return Err(error),
            }
        }
        let ratio = changed as f64 / content.verified_pages.len().max(1) as f64;
        if ratio > self.fallback_change_ratio {
            warn!(table = %name, changed, ratio, "material is stale for table");
            return Ok(false);
        }
        Ok(true)
    }

    fn assemble_table<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
        name: &str,
        content: &Content,
        report: &mut MechanicReport,
    ) -> Result<Fraction> {
        assembler.assemble_table(name, &content.sql)?;
        let mut fraction = Fraction::default();
        let column_count = TableShape::parse(&content.sql).map(|shape| shape.column_count());

        for (&page_no, &hash) in &content.verified_pages {
            if self.flag.is_suspended() || !self.progress.advance(1) {
                self.flag.suspend();
                return Err(RepairError::Interrupted);
            }
            match self.assemble_page(pager, assembler, page_no, hash, column_count)? {
                None => fraction.decoded += 1,
                Some(corruption) => {
                    warn!(
                        table = %name,
                        page = corruption.page,
                        field = %corruption.field,
                        detail = %corruption.detail,
                        "corrupted page"
                    );
                    fraction.corrupted += 1;
                    report.corruptions.push(corruption);
                }
            }
        }

        for sql in &content.associated_sqls {
            assembler.assemble_sql(sql)?;
        }
        if content.sequence > 0 {
            assembler.assemble_sequence(name, content.sequence)?;
        }
        Ok(fraction)
    }

    /// Assemble the cells of one recorded leaf. Returns the corruption that
    /// stopped it, if any.
    ///
    /// A leaf rewritten since the backup may have been freed and reused by
    /// another table, so its records must have the table's column count
    /// before any of them is assembled.
    fn assemble_page<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
        page_no: PageNo,
        hash: u32,
        column_count: Option<usize>,
    ) -> Result<Option<CorruptionReport>> {
        let page = match Page::decode(pager, page_no) {
            Ok(page) => page,
            Err(error) => return contained(error),
        };
        if page.page_type() != PageType::LeafTable {
            return Ok(Some(CorruptionReport {
                page: page_no,
                field: CorruptField::PageType,
                detail: format!("Recorded leaf is now a {:?} page", page.page_type()),
            }));
        }

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

        if !verify_page_hash(page.data(), hash) {
            if let Some(expected) = column_count {
                if let Some(cell) = cells.iter().find(|cell| cell.count() != expected) {
                    return Ok(Some(CorruptionReport {
                        page: page_no,
                        field: CorruptField::Payload,
                        detail: format!(
                            "Record of {} columns on a leaf of a {}-column table",
                            cell.count(),
                            expected
                        ),
                    }));
                }
            }
        }

        for cell in &cells {
            assembler.assemble_cell(cell)?;
        }
        match failure {
            Some(error) => contained(error),
            None => Ok(None),
        }
    }

    fn fall_back<H: SqlHandle>(
        &mut self,
        pager: &mut Pager,
        assembler: &mut Assembler<H>,
        report: &mut MechanicReport,
    ) -> Result<()> {
        let material = self.material;
        let tables: BTreeSet<String> = report.fallback_tables.iter().cloned().collect();
        let known_sqls = tables
            .iter()
            .filter_map(|name| {
                material
                    .contents
                    .get(name)
                    .map(|content| (name.clone(), content.sql.clone()))
            })
            .collect();
        info!(tables = ?tables, "falling back to full crawl");

        let mut crawler = FullCrawler::new()
            .only_tables(tables.clone())
            .with_known_sqls(known_sqls)
            .with_flag(self.flag.clone());
        let crawled = crawler.work(pager, assembler)?;

        for name in &tables {
            let mut fraction = crawled.table_scores.get(name).copied().unwrap_or_default();
            if let Some(content) = material.contents.get(name) {
                // Nothing found at all: every recorded leaf counts as lost.
                if fraction.total() == 0 {
                    fraction.corrupted = content.verified_pages.len() as u64;
                }
                for sql in &content.associated_sqls {
                    assembler.assemble_sql(sql)?;
                }
                if content.sequence > 0 {
                    assembler.assemble_sequence(name, content.sequence)?;
                }
            }
            report.table_scores.insert(name.clone(), fraction);
        }
        report.corruptions.extend(crawled.corruptions);
        Ok(())
    }
}

fn contained(error: RepairError) -> Result<Option<CorruptionReport>> {
    match error.as_report() {
        Some(report) => Ok(Some(report)),
        None => Err(error),
    }
}
