use crate::types::error::Result;

/// Locks supplied by whoever owns the live database's connections.
///
/// The exclusive lock is held only while page size and WAL metadata are
/// read; the shared lock keeps the WAL from being checkpointed away while
/// the crawl reads it.
pub trait BackupLocks {
    fn acquire_exclusive(&mut self) -> Result<()>;

    fn release_exclusive(&mut self);

    fn acquire_shared(&mut self) -> Result<()>;

    fn release_shared(&mut self);
}

/// For databases nobody else has open.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocks;

impl BackupLocks for NoLocks {
    fn acquire_exclusive(&mut self) -> Result<()> {
        Ok(())
    }

    fn release_exclusive(&mut self) {}

    fn acquire_shared(&mut self) -> Result<()> {
        Ok(())
    }

    fn release_shared(&mut self) {}
}
