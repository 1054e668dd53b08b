//! Recovery strategies built on the crawler, and the orchestration that
//! runs them across the live database and its snapshots.

pub mod assembler;
pub mod backup;
pub mod factory;
pub mod full_crawler;
pub mod locks;
pub mod mechanic;
pub mod retriever;
pub mod score;

/// Progress reporting as `(progress, increment)`, both in `[0, 1]`.
/// Returning false asks the running strategy to suspend.
pub type ProgressCallback<'a> = dyn FnMut(f64, f64) -> bool + 'a;

/// Table filter applied by backup and recovery; `true` keeps the table.
pub type TableFilter = dyn Fn(&str) -> bool + Send + Sync;

/// Page-count based progress feeding a [`ProgressCallback`].
pub struct Progress<'a> {
    callback: Option<Box<ProgressCallback<'a>>>,
    total: u64,
    done: u64,
}

impl<'a> Progress<'a> {
    pub fn new(callback: Box<ProgressCallback<'a>>) -> Self {
        Self {
            callback: Some(callback),
            total: 0,
            done: 0,
        }
    }

    pub fn silent() -> Self {
        Self {
            callback: None,
            total: 0,
            done: 0,
        }
    }

    pub fn reset(&mut self, total: u64) {
        self.total = total;
        self.done = 0;
    }

    /// Returns false once the callback has asked to stop.
    pub fn advance(&mut self, count: u64) -> bool {
        let Some(callback) = self.callback.as_mut() else {
            return true;
        };
        if self.total == 0 {
            return true;
        }
        let count = count.min(self.total - self.done);
        self.done += count;
        callback(
            self.done as f64 / self.total as f64,
            count as f64 / self.total as f64,
        )
    }

    /// Report whatever is left as done.
    pub fn finish(&mut self) -> bool {
        let left = self.total - self.done;
        left == 0 || self.advance(left)
    }
}
