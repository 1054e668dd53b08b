use std::collections::BTreeMap;

use crate::{
    crawler::{CrawlOutcome, Crawler, CrawlerClient},
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{CorruptionReport, RepairError, Result},
    },
};

/// Reads `sqlite_sequence`, keeping the largest value seen per table.
#[derive(Debug, Default)]
pub struct SequenceCrawler {
    sequences: BTreeMap<String, i64>,
    reports: Vec<CorruptionReport>,
}

impl SequenceCrawler {
    pub fn work(pager: &mut Pager, crawler: &mut Crawler, root: PageNo) -> Result<Self> {
        let mut sequences = Self::default();
        if crawler.crawl(pager, root, &mut sequences)? == CrawlOutcome::Interrupted {
            return Err(RepairError::Interrupted);
        }
        Ok(sequences)
    }

    pub fn sequences(&self) -> &BTreeMap<String, i64> {
        &self.sequences
    }

    pub fn into_sequences(self) -> BTreeMap<String, i64> {
        self.sequences
    }

    pub fn reports(&self) -> &[CorruptionReport] {
        &self.reports
    }
}

impl CrawlerClient for SequenceCrawler {
    fn on_cell_crawled(&mut self, cell: &Cell) {
        let name = cell.value(0);
        let (Some(name), Some(sequence)) = (name.as_text(), cell.value(1).as_integer()) else {
            return;
        };
        let entry = self.sequences.entry(name.to_string()).or_insert(sequence);
        *entry = (*entry).max(sequence);
    }

    fn on_crawler_error(&mut self, report: CorruptionReport) {
        self.reports.push(report);
    }
}
