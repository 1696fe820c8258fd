//! Diff and apply engine
//!
//! One synchronize work item compares the children of a source directory
//! with the children of its target directory, enqueues the resulting create,
//! update and delete actions, then enqueues a synchronize item for every
//! directory present on both sides.

use crate::equality::EqualityEvaluator;
use crate::events::{
    child_path, display_name, ActionEvent, BackupAction, BackupObserver, CompositeObserver,
    Decision, EntryPath, NoopObserver,
};
use crate::history;
use crate::progress::ProgressReader;
use crate::retry::RetryPolicy;
use crate::scheduler::{DirectoryReservation, Scheduler, SchedulerHandle};
use crate::summary::{SyncReport, SyncSummary};
use chrono::Utc;
use ferrobackup_config::BackupConfig;
use ferrobackup_types::{
    find_counterpart, CancellationToken, DirectoryEntry, Entry, EqualityMethods, Error, FileEntry,
    Parallelism, Result, RetryConfig, StorageProvider,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Policy for one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    /// Retry behavior for backend operations
    pub retry: RetryConfig,
    /// Bound on concurrently executing work items
    pub parallelism: Parallelism,
    /// Methods used to decide whether two files differ
    pub equality_methods: EqualityMethods,
    /// Create missing target directories
    pub can_create_directories: bool,
    /// Delete target directories missing from the source
    pub can_delete_directories: bool,
    /// Create missing target files
    pub can_create_files: bool,
    /// Rewrite target files that differ
    pub can_update_files: bool,
    /// Delete target files missing from the source
    pub can_delete_files: bool,
    /// Compare against the newest history version
    pub read_history: bool,
    /// Write updates as new history versions
    pub write_history: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            parallelism: Parallelism::UNBOUNDED,
            equality_methods: EqualityMethods::DEFAULT,
            can_create_directories: true,
            can_delete_directories: false,
            can_create_files: true,
            can_update_files: true,
            can_delete_files: false,
            read_history: false,
            write_history: false,
        }
    }
}

impl BackupOptions {
    /// Build options from the `backup` configuration section
    pub fn from_config(config: &BackupConfig) -> Result<Self> {
        Ok(Self {
            retry: config.retry_config()?,
            parallelism: config.parallelism()?,
            equality_methods: config.equality_methods,
            can_create_directories: config.can_create_directories,
            can_delete_directories: config.can_delete_directories,
            can_create_files: config.can_create_files,
            can_update_files: config.can_update_files,
            can_delete_files: config.can_delete_files,
            read_history: config.effective_read_history(),
            write_history: config.effective_write_history(),
        })
    }

    /// Enable both history reading and writing
    pub fn keep_history(mut self) -> Self {
        self.read_history = true;
        self.write_history = true;
        self
    }
}

/// Synchronizes a source tree into a target tree
pub struct BackupEngine {
    options: BackupOptions,
    observer: Arc<dyn BackupObserver>,
}

impl BackupEngine {
    /// Create an engine without observer
    pub fn new(options: BackupOptions) -> Self {
        Self {
            options,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Receive notifications through `observer`
    pub fn with_observer(mut self, observer: Arc<dyn BackupObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The run policy
    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Synchronize `target` with `source`
    ///
    /// Resolves once every directory of the tree has been processed and all
    /// enqueued work has drained.
    pub async fn run(
        &self,
        source: Arc<dyn DirectoryEntry>,
        target: Arc<dyn DirectoryEntry>,
        ct: &CancellationToken,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let summary = Arc::new(SyncSummary::new());
        let observer = CompositeObserver::new()
            .with(summary.clone())
            .with(self.observer.clone());
        let (scheduler, root) = Scheduler::new();

        let context = Arc::new(RunContext {
            evaluator: EqualityEvaluator::new(self.options.equality_methods),
            retry: RetryPolicy::new(self.options.retry.clone()),
            options: self.options.clone(),
            observer: Arc::new(observer),
            summary: summary.clone(),
            handle: scheduler.handle(),
            ct: ct.clone(),
        });

        info!(
            "Starting backup of '{}' into '{}' (equality: {})",
            source.name(),
            target.name(),
            self.options.equality_methods
        );
        context.schedule_synchronize(root, Arc::from(Vec::new()), source, target)?;
        scheduler.run(self.options.parallelism, ct).await?;

        let report = SyncReport {
            summary: summary.snapshot(),
            elapsed: start.elapsed(),
        };
        info!(
            "Backup finished in {:?}: {} change(s), {} error(s)",
            report.elapsed,
            report.summary.changes(),
            report.summary.errors
        );
        Ok(report)
    }

    /// Log in to both backends, open both roots, run, then log out
    ///
    /// Log-out is attempted even when the run fails.
    pub async fn run_providers(
        &self,
        source: &dyn StorageProvider,
        source_path: &str,
        target: &dyn StorageProvider,
        target_path: &str,
        ct: &CancellationToken,
    ) -> Result<SyncReport> {
        tokio::try_join!(source.log_in(ct), target.log_in(ct))?;

        let result = async {
            let (source_root, target_root) = tokio::try_join!(
                source.get_or_create_root(source_path, ct),
                target.get_or_create_root(target_path, ct)
            )?;
            self.run(source_root, target_root, ct).await
        }
        .await;

        let (source_logout, target_logout) = tokio::join!(source.log_out(ct), target.log_out(ct));
        for logout in [source_logout, target_logout] {
            if let Err(error) = logout {
                warn!("Log-out failed: {}", error);
            }
        }
        result
    }
}

struct RunContext {
    options: BackupOptions,
    evaluator: EqualityEvaluator,
    retry: RetryPolicy,
    observer: Arc<dyn BackupObserver>,
    summary: Arc<SyncSummary>,
    handle: SchedulerHandle,
    ct: CancellationToken,
}

impl RunContext {
    fn notify(
        &self,
        action: BackupAction,
        path: &EntryPath,
        source: Option<Entry>,
        target: Option<Entry>,
        method: EqualityMethods,
    ) -> Decision {
        let event = ActionEvent::new(action, path.clone(), source, target).with_method(method);
        let decision = self.observer.on_action(&event);
        if decision.is_skip() && action.is_cancellable() {
            debug!(
                "{} vetoed for {}",
                action,
                display_name(path, event.subject().map(Entry::name))
            );
            decision
        } else {
            Decision::Proceed
        }
    }

    fn schedule_synchronize(
        self: &Arc<Self>,
        reservation: DirectoryReservation,
        path: EntryPath,
        source: Arc<dyn DirectoryEntry>,
        target: Arc<dyn DirectoryEntry>,
    ) -> Result<()> {
        let context = Arc::clone(self);
        reservation.submit(async move {
            if context.synchronize(&path, &source, &target).await? {
                context.notify(
                    BackupAction::Synchronized,
                    &path,
                    Some(Entry::Directory(source)),
                    Some(Entry::Directory(target)),
                    EqualityMethods::NONE,
                );
            }
            Ok(())
        })
    }

    /// Returns false when the directory was skipped
    async fn synchronize(
        self: &Arc<Self>,
        path: &EntryPath,
        source: &Arc<dyn DirectoryEntry>,
        target: &Arc<dyn DirectoryEntry>,
    ) -> Result<bool> {
        let ct = &self.ct;
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let target_entry = Entry::Directory(target.clone());
        if self
            .notify(
                BackupAction::Synchronizing,
                path,
                Some(Entry::Directory(source.clone())),
                Some(target_entry.clone()),
                EqualityMethods::NONE,
            )
            .is_skip()
        {
            return Ok(false);
        }

        let Some(source_items) = self.list(source.as_ref(), "list source directory").await? else {
            return Ok(false);
        };
        let Some(target_items) = self.list(target.as_ref(), "list target directory").await? else {
            return Ok(false);
        };
        debug!(
            "Synchronizing {} ({} source, {} target entries)",
            display_name(path, None),
            source_items.len(),
            target_items.len()
        );

        let mut subdirectories = Vec::new();
        for source_item in &source_items {
            if self
                .notify(
                    BackupAction::SynchronizingEntry,
                    path,
                    Some(source_item.clone()),
                    Some(target_entry.clone()),
                    EqualityMethods::NONE,
                )
                .is_skip()
            {
                continue;
            }

            let Some(target_item) = find_counterpart(&target_items, source_item) else {
                self.schedule_create(path, source_item, target)?;
                continue;
            };

            match (source_item, target_item) {
                (Entry::File(source_file), Entry::File(target_file)) => {
                    let Some(different) = self.compare(source_file, target_file, &target_items).await?
                    else {
                        continue;
                    };
                    if different.is_empty() {
                        self.notify(
                            BackupAction::Synchronized,
                            path,
                            Some(source_item.clone()),
                            Some(target_item.clone()),
                            EqualityMethods::NONE,
                        );
                    } else {
                        self.schedule_update(
                            path,
                            source_file,
                            target,
                            target_item,
                            &target_items,
                            different,
                        )?;
                    }
                }
                (Entry::Directory(source_directory), Entry::Directory(target_directory)) => {
                    subdirectories.push((source_directory.clone(), target_directory.clone()));
                }
                _ => {}
            }
        }

        let keep_history_files = self.options.read_history || self.options.write_history;
        for target_item in &target_items {
            if find_counterpart(&source_items, target_item).is_some() {
                continue;
            }
            if keep_history_files
                && target_item.is_file()
                && history::is_history_name(target_item.name())
            {
                continue;
            }
            self.schedule_delete(path, source, target_item)?;
        }

        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for (source_directory, target_directory) in subdirectories {
            let reservation = self.handle.reserve_directory();
            let child = child_path(path, source_directory.name());
            self.schedule_synchronize(reservation, child, source_directory, target_directory)?;
        }
        Ok(true)
    }

    async fn list(&self, directory: &dyn DirectoryEntry, operation: &str) -> Result<Option<Vec<Entry>>> {
        let ct = &self.ct;
        let items = self
            .retry
            .run(operation, self.observer.as_ref(), ct, move || directory.list_children(ct))
            .await?;
        if items.is_none() {
            self.summary.record_error();
        }
        Ok(items)
    }

    /// `None` when the comparison was abandoned
    async fn compare(
        &self,
        source: &Arc<dyn FileEntry>,
        target: &Arc<dyn FileEntry>,
        siblings: &[Entry],
    ) -> Result<Option<EqualityMethods>> {
        let baseline = if self.options.read_history {
            history::newest(siblings, target.name()).map_or_else(|| target.clone(), |version| version.file)
        } else {
            target.clone()
        };

        let ct = &self.ct;
        let evaluator = &self.evaluator;
        let (source, baseline) = (source.as_ref(), baseline.as_ref());
        let different = self
            .retry
            .run("compare files", self.observer.as_ref(), ct, move || {
                evaluator.compare(source, baseline, ct)
            })
            .await?;
        if different.is_none() {
            self.summary.record_error();
        }
        Ok(different)
    }

    /// Copy `source` into `target` as `name`, `None` when abandoned
    async fn copy_file(
        &self,
        path: &EntryPath,
        source: &Arc<dyn FileEntry>,
        target: &Arc<dyn DirectoryEntry>,
        name: &str,
    ) -> Result<Option<Arc<dyn FileEntry>>> {
        let ct = &self.ct;
        let observer = &self.observer;
        let created = self
            .retry
            .run("copy file", self.observer.as_ref(), ct, move || async move {
                let length = source.length();
                let stream = source.open_read(ct).await?;
                let reader = ProgressReader::new(
                    stream,
                    observer.clone(),
                    path.clone(),
                    Entry::File(source.clone()),
                    Entry::Directory(target.clone()),
                    length,
                );
                target.create_file(name, Box::pin(reader), length, ct).await
            })
            .await?;
        if created.is_none() {
            self.summary.record_error();
        }
        Ok(created)
    }

    fn schedule_create(
        self: &Arc<Self>,
        path: &EntryPath,
        source_item: &Entry,
        target: &Arc<dyn DirectoryEntry>,
    ) -> Result<()> {
        let allowed = match source_item {
            Entry::File(_) => self.options.can_create_files,
            Entry::Directory(_) => self.options.can_create_directories,
        };
        if !allowed
            || self
                .notify(
                    BackupAction::Creating,
                    path,
                    Some(source_item.clone()),
                    Some(Entry::Directory(target.clone())),
                    EqualityMethods::NONE,
                )
                .is_skip()
        {
            return Ok(());
        }

        let context = Arc::clone(self);
        let path = path.clone();
        let target = target.clone();
        match source_item.clone() {
            Entry::File(file) => self.handle.submit(async move {
                let name = file.name().to_string();
                if let Some(created) = context.copy_file(&path, &file, &target, &name).await? {
                    context.notify(
                        BackupAction::Created,
                        &path,
                        Some(Entry::File(file)),
                        Some(Entry::File(created)),
                        EqualityMethods::NONE,
                    );
                }
                Ok(())
            }),
            Entry::Directory(directory) => {
                // Held until the new directory's own synchronization finishes.
                let reservation = self.handle.reserve_directory();
                self.handle.submit(async move {
                    let ct = &context.ct;
                    let name = directory.name();
                    let parent = target.as_ref();
                    let created = context
                        .retry
                        .run("create directory", context.observer.as_ref(), ct, move || {
                            parent.create_directory(name, ct)
                        })
                        .await?;
                    let Some(created) = created else {
                        context.summary.record_error();
                        return Ok(());
                    };

                    context.notify(
                        BackupAction::Created,
                        &path,
                        Some(Entry::Directory(directory.clone())),
                        Some(Entry::Directory(created.clone())),
                        EqualityMethods::NONE,
                    );
                    let child = child_path(&path, directory.name());
                    context.schedule_synchronize(reservation, child, directory, created)
                })
            }
        }
    }

    fn schedule_update(
        self: &Arc<Self>,
        path: &EntryPath,
        source: &Arc<dyn FileEntry>,
        target: &Arc<dyn DirectoryEntry>,
        target_item: &Entry,
        siblings: &[Entry],
        method: EqualityMethods,
    ) -> Result<()> {
        if !self.options.can_update_files
            || self
                .notify(
                    BackupAction::Updating,
                    path,
                    Some(Entry::File(source.clone())),
                    Some(target_item.clone()),
                    method,
                )
                .is_skip()
        {
            return Ok(());
        }

        let name = if self.options.write_history {
            history::fresh_name(siblings, source.name(), Utc::now())
        } else {
            source.name().to_string()
        };
        let context = Arc::clone(self);
        let path = path.clone();
        let source = source.clone();
        let target = target.clone();
        self.handle.submit(async move {
            if let Some(updated) = context.copy_file(&path, &source, &target, &name).await? {
                context.notify(
                    BackupAction::Updated,
                    &path,
                    Some(Entry::File(source)),
                    Some(Entry::File(updated)),
                    method,
                );
            }
            Ok(())
        })
    }

    fn schedule_delete(
        self: &Arc<Self>,
        path: &EntryPath,
        source: &Arc<dyn DirectoryEntry>,
        target_item: &Entry,
    ) -> Result<()> {
        let allowed = match target_item {
            Entry::File(_) => self.options.can_delete_files,
            Entry::Directory(_) => self.options.can_delete_directories,
        };
        let source_entry = Entry::Directory(source.clone());
        if !allowed
            || self
                .notify(
                    BackupAction::Deleting,
                    path,
                    Some(source_entry.clone()),
                    Some(target_item.clone()),
                    EqualityMethods::NONE,
                )
                .is_skip()
        {
            return Ok(());
        }

        let context = Arc::clone(self);
        let path = path.clone();
        let target_item = target_item.clone();
        self.handle.submit(async move {
            let ct = &context.ct;
            let item = &target_item;
            let deleted = context
                .retry
                .run("delete entry", context.observer.as_ref(), ct, move || item.delete(ct))
                .await?;
            match deleted {
                Some(()) => {
                    context.notify(
                        BackupAction::Deleted,
                        &path,
                        Some(source_entry),
                        Some(target_item),
                        EqualityMethods::NONE,
                    );
                }
                None => context.summary.record_error(),
            }
            Ok(())
        })
    }
}
