//! Run summary counters

use crate::events::{ActionEvent, BackupAction, BackupObserver, Decision};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Observer counting completed actions
#[derive(Debug, Default)]
pub struct SyncSummary {
    directories: AtomicU64,
    directories_created: AtomicU64,
    directories_deleted: AtomicU64,
    files: AtomicU64,
    files_created: AtomicU64,
    files_updated: AtomicU64,
    files_deleted: AtomicU64,
    errors: AtomicU64,
}

impl SyncSummary {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a work item abandoned under `continue_on_error`
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            directories_created: self.directories_created.load(Ordering::Relaxed),
            directories_deleted: self.directories_deleted.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            files_created: self.files_created.load(Ordering::Relaxed),
            files_updated: self.files_updated.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl BackupObserver for SyncSummary {
    fn on_action(&self, event: &ActionEvent) -> Decision {
        let is_directory = event.subject().is_some_and(|entry| entry.is_directory());
        let counter = match (event.action, is_directory) {
            (BackupAction::Synchronized, true) => &self.directories,
            (BackupAction::Synchronized, false) => &self.files,
            (BackupAction::Created, true) => &self.directories_created,
            (BackupAction::Created, false) => &self.files_created,
            (BackupAction::Updated, _) => &self.files_updated,
            (BackupAction::Deleted, true) => &self.directories_deleted,
            (BackupAction::Deleted, false) => &self.files_deleted,
            _ => return Decision::Proceed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Decision::Proceed
    }
}

/// Point-in-time copy of [`SyncSummary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SummarySnapshot {
    /// Directory pairs fully synchronized
    pub directories: u64,
    /// Directories created in the target
    pub directories_created: u64,
    /// Directories deleted from the target
    pub directories_deleted: u64,
    /// Files found equal
    pub files: u64,
    /// Files created in the target
    pub files_created: u64,
    /// Files rewritten in the target
    pub files_updated: u64,
    /// Files deleted from the target
    pub files_deleted: u64,
    /// Work items skipped after exhausting retries
    pub errors: u64,
}

impl SummarySnapshot {
    /// Total number of changes applied to the target
    pub fn changes(&self) -> u64 {
        self.directories_created
            + self.directories_deleted
            + self.files_created
            + self.files_updated
            + self.files_deleted
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Counters at the end of the run
    pub summary: SummarySnapshot,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}
