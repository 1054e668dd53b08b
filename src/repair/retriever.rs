//! Rebuilds a damaged database from the live file and its deposited
//! snapshots, then swaps the result into place.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::RepairConfig,
    material::{load_material, save_material},
    repair::{
        Progress, ProgressCallback, TableFilter,
        assembler::Assembler,
        backup::Backup,
        factory::{Depositor, Factory},
        full_crawler::FullCrawler,
        locks::{BackupLocks, NoLocks},
        mechanic::Mechanic,
        score::{normalize_weights, weighted_score},
    },
    sql::{SqlError, SqlHandle},
    storage::{
        file_layer::FileLayer,
        pager::{Pager, PagerConfig},
    },
    types::error::{CorruptionReport, ErrorTracker, RepairError, Result, Severity},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    Mechanic,
    FullCrawler,
    /// The source could not be opened at all.
    Unreadable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub path: String,
    pub weight: f64,
    pub score: f64,
    pub strategy: Strategy,
    pub corruptions: Vec<CorruptionReport>,
    pub fallback_tables: Vec<String>,
    pub pages: usize,
    /// Seconds.
    pub cost: f64,
}

impl SourceReport {
    fn new(path: &Path, weight: f64, strategy: Strategy) -> Self {
        Self {
            path: path.display().to_string(),
            weight,
            score: 0.0,
            strategy,
            corruptions: Vec::new(),
            fallback_tables: Vec::new(),
            pages: 0,
            cost: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveReport {
    pub score: f64,
    pub severity: Severity,
    pub sources: Vec<SourceReport>,
    /// Workshop the damaged original was archived into.
    pub deposited: Option<String>,
    /// False when another database appeared at the destination first.
    pub replaced: bool,
}

pub struct Retriever<'a> {
    factory: Factory,
    config: RepairConfig,
    pager_config: PagerConfig,
    layer: &'a dyn FileLayer,
    locks: Box<dyn BackupLocks + 'a>,
    filter: Option<Arc<TableFilter>>,
    progress: Option<Box<ProgressCallback<'a>>>,
    progress_done: f64,
    tracker: ErrorTracker,
}

impl<'a> Retriever<'a> {
    pub fn new<P: AsRef<Path>>(database: P, config: RepairConfig, layer: &'a dyn FileLayer) -> Self {
        let pager_config = PagerConfig::from_repair_config(&config);
        Self {
            factory: Factory::new(database),
            config,
            pager_config,
            layer,
            locks: Box::new(NoLocks),
            filter: None,
            progress: None,
            progress_done: 0.0,
            tracker: ErrorTracker::new(),
        }
    }

    pub fn with_pager_config(mut self, pager_config: PagerConfig) -> Self {
        self.pager_config = pager_config;
        self
    }

    pub fn with_locks(mut self, locks: Box<dyn BackupLocks + 'a>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_filter(mut self, filter: Arc<TableFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_progress(mut self, progress: Box<ProgressCallback<'a>>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Run the whole repair. `open_handle` opens the SQL engine on the
    /// database being assembled.
    ///
    /// Any error returned leaves the original database where it was.
    pub fn work<H, O>(&mut self, mut open_handle: O) -> Result<RetrieveReport>
    where
        H: SqlHandle,
        O: FnMut(&Path) -> std::result::Result<H, SqlError>,
    {
        let started = Instant::now();
        self.tracker = ErrorTracker::new();
        self.progress_done = 0.0;

        let restore_directory = self.factory.restore_directory();
        self.layer.remove_items(std::slice::from_ref(&restore_directory))?;
        self.layer.create_directory(&restore_directory)?;

        let workshops = self.factory.workshop_directories()?;
        let mut sources = vec![self.factory.database().to_path_buf()];
        for workshop in &workshops {
            let database = self.factory.workshop_database(workshop);
            if self.layer.file_exists(&database)? {
                sources.push(database);
            } else {
                warn!(workshop = %workshop.display(), "workshop holds no database");
            }
        }
        let mut sizes = Vec::with_capacity(sources.len());
        for source in &sources {
            let mut size = 0;
            for path in Factory::database_paths(source) {
                size += self.layer.file_size(&path)?;
            }
            sizes.push(size);
        }
        let weights = normalize_weights(&sizes);

        let restored = self.factory.restore_database();
        let mut assembler = Assembler::new(open_handle(&restored)?, self.config.milestone_interval);
        assembler.mark_as_assembling()?;

        let mut reports = Vec::with_capacity(sources.len());
        for (index, (source, &weight)) in sources.iter().zip(&weights).enumerate() {
            // Rows from the live file win over rows from older snapshots.
            assembler.mark_duplicated_as_ignorable(index > 0);
            match self.restore(source, weight, &mut assembler) {
                Ok(report) => reports.push(report),
                Err(RepairError::Interrupted) => return Err(RepairError::Interrupted),
                Err(error) => {
                    let severity = error.severity();
                    if severity == Severity::Critical || (index == 0 && severity >= Severity::Normal)
                    {
                        return Err(error);
                    }
                    warn!(source = %source.display(), error = %error, "source skipped");
                    self.tracker.try_upgrade(error);
                    reports.push(SourceReport::new(source, weight, Strategy::Unreadable));
                }
            }
            if index == 0 && self.tracker.severity() >= Severity::Normal {
                return Err(self.tracker.take().unwrap_or(RepairError::NothingRecovered));
            }
        }
        assembler.mark_as_assembled()?;
        drop(assembler);

        let score = weighted_score(reports.iter().map(|report| (report.weight, report.score)));
        info!(
            database = %self.factory.database().display(),
            score,
            sources = reports.len(),
            cost = started.elapsed().as_secs_f64(),
            "retrieve summary"
        );
        if score <= 0.0 {
            return Err(RepairError::NothingRecovered);
        }

        let mut backup = Backup::new(self.pager_config.clone());
        if let Some(filter) = &self.filter {
            backup = backup.with_filter(filter.clone());
        }
        let material = backup.produce(&restored, self.locks.as_mut())?;
        save_material(&restored, &material)?;

        let depositor = Depositor::new(&self.factory, self.layer, self.config.max_snapshots);
        let workshop = depositor.work()?;

        let replaced = self.move_into_place(&restored)?;
        if self.tracker.severity() <= Severity::Ignorable {
            // Everything deposited before this run is merged into the result.
            self.layer.remove_items(&workshops)?;
        }
        self.layer.remove_items(std::slice::from_ref(&restore_directory))?;
        self.factory.remove_directory_if_empty(self.layer)?;

        Ok(RetrieveReport {
            score,
            severity: self.tracker.severity(),
            sources: reports,
            deposited: Some(workshop.display().to_string()),
            replaced,
        })
    }

    fn move_into_place(&mut self, restored: &Path) -> Result<bool> {
        let directory = self
            .factory
            .database()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let items: Vec<(PathBuf, PathBuf)> = Factory::associated_paths(restored)
            .into_iter()
            .filter_map(|source| {
                let name = source.file_name()?.to_owned();
                Some((source, directory.join(name)))
            })
            .collect();
        match self.layer.move_items(&items) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(
                    database = %self.factory.database().display(),
                    "database reappeared during repair, discarding the recovered copy"
                );
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn restore<H: SqlHandle>(
        &mut self,
        source: &Path,
        weight: f64,
        assembler: &mut Assembler<H>,
    ) -> Result<SourceReport> {
        let started = Instant::now();
        let material = match load_material(source) {
            Ok(material) => material,
            Err(error) => {
                warn!(source = %source.display(), error = %error, "material unreadable");
                self.tracker.try_upgrade_with(error, Severity::Normal);
                None
            }
        };

        let mut pager_config = self.pager_config.clone();
        if let Some(material) = &material {
            pager_config.page_size = Some(material.info.page_size);
            pager_config.reserved_bytes = u8::try_from(material.info.reserved_bytes).ok();
        }
        let mut pager = Pager::open(source, pager_config)?;

        let fallback_change_ratio = self.config.fallback_change_ratio;
        let filter = self.filter.clone();
        let callback = &mut self.progress;
        let done = &mut self.progress_done;
        let progress = Progress::new(Box::new(move |_: f64, increment: f64| {
            let Some(callback) = callback.as_mut() else {
                return true;
            };
            let increment = increment * weight;
            *done = (*done + increment).min(1.0);
            callback(*done, increment)
        }));

        let mut report = match &material {
            Some(material) => {
                let mut mechanic = Mechanic::new(material, fallback_change_ratio)
                    .with_filter(filter)
                    .with_progress(progress);
                let result = mechanic.work(&mut pager, assembler)?;
                let mut report = SourceReport::new(source, weight, Strategy::Mechanic);
                report.score = result.score.value();
                report.corruptions = result.corruptions;
                report.fallback_tables = result.fallback_tables;
                report.pages = result.total_pages;
                report
            }
            None => {
                let mut crawler = FullCrawler::new().with_filter(filter).with_progress(progress);
                let result = crawler.work(&mut pager, assembler)?;
                let mut report = SourceReport::new(source, weight, Strategy::FullCrawler);
                report.score = result.score.value();
                report.corruptions = result.corruptions;
                report.pages = result.total_pages as usize;
                report
            }
        };
        report.cost = started.elapsed().as_secs_f64();
        info!(
            source = %report.path,
            strategy = ?report.strategy,
            score = report.score,
            weight = report.weight,
            pages = report.pages,
            corruptions = report.corruptions.len(),
            cost = report.cost,
            "source retrieved"
        );
        Ok(report)
    }
}
