//! Concurrent tree synchronization for FerroBackup
//!
//! The engine walks a source and a target directory tree through the storage
//! contract of `ferrobackup-types` and makes the target mirror the source:
//!
//! - **Diffing**: children are paired by case-insensitive name and kind
//! - **Equality**: length, modification time, byte content or digests
//! - **History**: updates may be written as timestamped versions
//! - **Scheduling**: a growing work queue with bounded parallelism
//! - **Retry**: fixed backoff, optional skip-and-continue
//! - **Events**: cancellable before-actions, after-actions, copy progress
//!
//! # Examples
//!
//! ```rust,no_run
//! use ferrobackup_sync::{BackupEngine, BackupOptions};
//! use ferrobackup_types::{CancellationToken, StorageProvider};
//!
//! # async fn example(source: &dyn StorageProvider, target: &dyn StorageProvider)
//! #     -> ferrobackup_types::Result<()> {
//! let engine = BackupEngine::new(BackupOptions::default().keep_history());
//! let report = engine
//!     .run_providers(source, "photos", target, "backup/photos", &CancellationToken::new())
//!     .await?;
//! println!("{} change(s)", report.summary.changes());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod equality;
pub mod events;
pub mod history;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod summary;

pub use engine::{BackupEngine, BackupOptions};
pub use equality::EqualityEvaluator;
pub use events::{
    ActionEvent, BackupAction, BackupObserver, CompositeObserver, CopyProgress, Decision,
    EntryPath, ErrorEvent, NoopObserver,
};
pub use retry::RetryPolicy;
pub use scheduler::{DirectoryReservation, Scheduler, SchedulerHandle};
pub use summary::{SummarySnapshot, SyncReport, SyncSummary};
