//! Pre-order b-tree traversal that contains corruption to the damaged
//! subtree.
//!
//! A [`Crawler`] drives the walk and a [`CrawlerClient`] decides what to do
//! with each page and cell. Structural failures are handed to the client as
//! [`CorruptionReport`]s and the walk continues with the next sibling; only
//! non-structural failures (I/O) end it with an error.

pub mod schema;
pub mod sequence;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, warn};

use crate::{
    storage::pager::Pager,
    types::{
        MAX_BTREE_DEPTH, PageNo,
        cell::Cell,
        error::{CorruptField, CorruptionReport, RepairError, Result},
        page::{Page, PageType},
    },
};

pub trait CrawlerClient {
    fn on_cell_crawled(&mut self, cell: &Cell);

    /// Return false to skip `page` and its subtree.
    fn will_crawl_page(&mut self, _page: &Page, _depth: usize) -> bool {
        true
    }

    /// Called after every cell of a leaf decoded cleanly.
    fn on_page_crawled(&mut self, _page: &Page) {}

    fn on_crawler_error(&mut self, report: CorruptionReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Start,
    VisitInterior,
    VisitLeaf,
    Done,
    Suspended,
    CorruptedSubtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    Completed,
    /// At least one subtree was skipped; everything else was visited.
    Corrupted,
    Interrupted,
}

/// Shared flag polled between visits.
#[derive(Debug, Clone, Default)]
pub struct SuspendFlag(Arc<AtomicBool>);

impl SuspendFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_suspended(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct Crawler {
    flag: SuspendFlag,
    state: CrawlState,
    corrupted: bool,
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

impl Crawler {
    pub fn new() -> Self {
        Self::with_flag(SuspendFlag::new())
    }

    pub fn with_flag(flag: SuspendFlag) -> Self {
        Self {
            flag,
            state: CrawlState::Start,
            corrupted: false,
        }
    }

    pub fn flag(&self) -> &SuspendFlag {
        &self.flag
    }

    pub fn suspend(&self) {
        self.flag.suspend();
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn crawl<C: CrawlerClient + ?Sized>(
        &mut self,
        pager: &mut Pager,
        root: PageNo,
        client: &mut C,
    ) -> Result<CrawlOutcome> {
        self.state = CrawlState::Start;
        self.corrupted = false;
        let mut visited: HashSet<PageNo> = HashSet::new();
        let mut stack: Vec<(PageNo, usize)> = vec![(root, 1)];

        while let Some((page_no, depth)) = stack.pop() {
            if self.flag.is_suspended() {
                self.state = CrawlState::Suspended;
                debug!(root, page = page_no, "crawl suspended");
                return Ok(CrawlOutcome::Interrupted);
            }
            if depth > MAX_BTREE_DEPTH {
                self.contain(
                    client,
                    RepairError::corruption(
                        page_no,
                        CorruptField::Depth,
                        format!("B-tree depth exceeds {}", MAX_BTREE_DEPTH),
                    ),
                )?;
                continue;
            }
            if !visited.insert(page_no) {
                self.contain(
                    client,
                    RepairError::corruption(
                        page_no,
                        CorruptField::PageCycle,
                        "Page is referenced twice in one b-tree",
                    ),
                )?;
                continue;
            }

            let page = match Page::decode(pager, page_no) {
                Ok(page) => page,
                Err(error) => {
                    self.contain(client, error)?;
                    continue;
                }
            };
            if !page.page_type().is_table() {
                self.contain(
                    client,
                    RepairError::corruption(
                        page_no,
                        CorruptField::PageType,
                        format!("Unexpected {:?} page in a table b-tree", page.page_type()),
                    ),
                )?;
                continue;
            }
            if !client.will_crawl_page(&page, depth) {
                continue;
            }

            match page.page_type() {
                PageType::InteriorTable => {
                    self.state = CrawlState::VisitInterior;
                    match page.child_page_numbers() {
                        Ok(children) => {
                            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
                        }
                        Err(error) => self.contain(client, error)?,
                    }
                }
                _ => {
                    self.state = CrawlState::VisitLeaf;
                    if self.crawl_leaf(pager, &page, client)? {
                        client.on_page_crawled(&page);
                    }
                }
            }
        }

        if self.corrupted {
            self.state = CrawlState::CorruptedSubtree;
            Ok(CrawlOutcome::Corrupted)
        } else {
            self.state = CrawlState::Done;
            Ok(CrawlOutcome::Completed)
        }
    }

    /// Deliver every cell of a leaf. Stops at the first bad cell; cells
    /// already delivered stay delivered. Returns whether the leaf was clean.
    fn crawl_leaf<C: CrawlerClient + ?Sized>(
        &mut self,
        pager: &mut Pager,
        page: &Page,
        client: &mut C,
    ) -> Result<bool> {
        for &offset in page.cell_offsets() {
            match Cell::decode(pager, page, offset) {
                Ok(cell) => client.on_cell_crawled(&cell),
                Err(error) => {
                    self.contain(client, error)?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn contain<C: CrawlerClient + ?Sized>(
        &mut self,
        client: &mut C,
        error: RepairError,
    ) -> Result<()> {
        let Some(report) = error.as_report() else {
            return Err(error);
        };
        warn!(page = report.page, field = %report.field, detail = %report.detail, "corrupted subtree");
        self.corrupted = true;
        client.on_crawler_error(report);
        Ok(())
    }
}
