//! Filesystem layout of a database's repair history.
//!
//! ```text
//! <db>.factory/
//!     restore/                <- assembled result before it is moved in place
//!     20260101120000123456/   <- a workshop: one deposited copy of the database
//!         <db>, <db>-wal, ...
//! ```

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::{
    material::{first_material_path, last_material_path},
    storage::{file_layer::FileLayer, wal::wal_path_for},
    types::error::Result,
};

const FACTORY_EXTENSION: &str = ".factory";
const RESTORE_DIRECTORY: &str = "restore";
const WORKSHOP_TIME_FORMAT: &str = "%Y%m%d%H%M%S%6f";

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

#[derive(Debug, Clone)]
pub struct Factory {
    database: PathBuf,
    directory: PathBuf,
}

impl Factory {
    pub fn new<P: AsRef<Path>>(database: P) -> Self {
        let database = database.as_ref().to_path_buf();
        let directory = suffixed(&database, FACTORY_EXTENSION);
        Self {
            database,
            directory,
        }
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn restore_directory(&self) -> PathBuf {
        self.directory.join(RESTORE_DIRECTORY)
    }

    pub fn database_name(&self) -> &std::ffi::OsStr {
        self.database.file_name().unwrap_or(self.database.as_os_str())
    }

    /// Where the assembled database is built before it replaces the original.
    pub fn restore_database(&self) -> PathBuf {
        self.restore_directory().join(self.database_name())
    }

    /// Workshop directories, newest first. Missing factory means none.
    pub fn workshop_directories(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        let mut workshops = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.file_name() != RESTORE_DIRECTORY {
                workshops.push(entry.path());
            }
        }
        // Workshop names are fixed-width timestamps.
        workshops.sort();
        workshops.reverse();
        Ok(workshops)
    }

    /// The deposited database inside `workshop`.
    pub fn workshop_database(&self, workshop: &Path) -> PathBuf {
        workshop.join(self.database_name())
    }

    pub fn unique_workshop_directory<F: FileLayer + ?Sized>(&self, layer: &F) -> io::Result<PathBuf> {
        loop {
            let name = Local::now().format(WORKSHOP_TIME_FORMAT).to_string();
            let path = self.directory.join(name);
            if !layer.file_exists(&path)? {
                return Ok(path);
            }
        }
    }

    /// Remove the factory if only the restore directory (or nothing) is left.
    pub fn remove_directory_if_empty<F: FileLayer + ?Sized>(&self, layer: &F) -> io::Result<()> {
        if !self.workshop_directories()?.is_empty() {
            return Ok(());
        }
        if layer.file_exists(&self.directory)? {
            layer.remove_items(&[self.directory.clone()])?;
        }
        Ok(())
    }

    /// Everything that belongs to `database` and moves with it.
    pub fn associated_paths(database: &Path) -> Vec<PathBuf> {
        let mut paths = Self::database_paths(database);
        paths.push(first_material_path(database));
        paths.push(last_material_path(database));
        paths
    }

    /// The files whose sizes weigh a source.
    pub fn database_paths(database: &Path) -> Vec<PathBuf> {
        vec![
            database.to_path_buf(),
            suffixed(database, "-journal"),
            wal_path_for(database),
            suffixed(database, "-shm"),
        ]
    }
}

/// Moves the live database into a fresh workshop, keeping at most
/// `max_snapshots` workshops.
pub struct Depositor<'a, F: FileLayer + ?Sized> {
    factory: &'a Factory,
    layer: &'a F,
    max_snapshots: usize,
}

impl<'a, F: FileLayer + ?Sized> Depositor<'a, F> {
    pub fn new(factory: &'a Factory, layer: &'a F, max_snapshots: usize) -> Self {
        Self {
            factory,
            layer,
            // The workshop just deposited is never pruned.
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Returns the workshop the database went into.
    pub fn work(&self) -> Result<PathBuf> {
        let workshop = self.factory.unique_workshop_directory(self.layer)?;
        self.layer.create_directory(&workshop)?;

        let items: Vec<(PathBuf, PathBuf)> = Factory::associated_paths(self.factory.database())
            .into_iter()
            .filter_map(|source| {
                let name = source.file_name()?.to_owned();
                Some((source, workshop.join(name)))
            })
            .collect();
        self.layer.move_items(&items)?;
        info!(
            database = %self.factory.database().display(),
            workshop = %workshop.display(),
            "database deposited"
        );

        self.prune()?;
        Ok(workshop)
    }

    /// Drop the oldest workshops beyond the limit.
    pub fn prune(&self) -> Result<Vec<PathBuf>> {
        let workshops = self.factory.workshop_directories()?;
        let stale: Vec<PathBuf> = workshops.into_iter().skip(self.max_snapshots).collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "pruning workshops");
            if let Err(error) = self.layer.remove_items(&stale) {
                warn!(error = %error, "failed to prune workshops");
                return Err(error.into());
            }
        }
        Ok(stale)
    }
}
