//! Notifications raised while a backup runs
//!
//! Observers are called synchronously at every decision point. Returning
//! [`Decision::Skip`] from an "about to" notification vetoes the action and
//! everything that would follow from it.

use ferrobackup_types::{Entry, EqualityMethods, Error};
use std::fmt;
use std::sync::Arc;

/// Directory names from the sync root down to the current directory
pub type EntryPath = Arc<[String]>;

/// Extend `path` with one directory name
pub fn child_path(path: &EntryPath, name: &str) -> EntryPath {
    path.iter()
        .cloned()
        .chain(std::iter::once(name.to_string()))
        .collect()
}

/// Render `path` and an entry name as `/a/b/name`
pub fn display_name(path: &[String], name: Option<&str>) -> String {
    let mut display = String::from("/");
    for part in path {
        display.push_str(part);
        display.push('/');
    }
    if let Some(name) = name {
        display.push_str(name);
    }
    display
}

/// State transitions reported for entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupAction {
    /// A directory pair is about to be compared
    Synchronizing,
    /// A source entry is about to be matched against the target
    SynchronizingEntry,
    /// A missing target entry is about to be created
    Creating,
    /// A target entry was created
    Created,
    /// A different target file is about to be rewritten
    Updating,
    /// A target file was rewritten
    Updated,
    /// A target entry without source counterpart is about to be deleted
    Deleting,
    /// A target entry was deleted
    Deleted,
    /// Source and target are equal
    Synchronized,
}

impl BackupAction {
    /// Whether observers may veto this action
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Synchronizing
                | Self::SynchronizingEntry
                | Self::Creating
                | Self::Updating
                | Self::Deleting
        )
    }
}

impl fmt::Display for BackupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observer answer to a cancellable notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// Carry on
    #[default]
    Proceed,
    /// Skip the action (or stop retrying)
    Skip,
}

impl Decision {
    /// True for [`Decision::Skip`]
    pub fn is_skip(self) -> bool {
        self == Self::Skip
    }
}

/// One action notification
#[derive(Debug, Clone)]
pub struct ActionEvent {
    /// What happens
    pub action: BackupAction,
    /// Directory names from the sync root
    pub path: EntryPath,
    /// Source side: the source entry, or the source directory for deletions
    pub source: Option<Entry>,
    /// Target side: the target entry, its parent directory, or the created entry
    pub target: Option<Entry>,
    /// Methods that detected a difference (updates only)
    pub method: EqualityMethods,
}

impl ActionEvent {
    /// Create an event without equality information
    pub fn new(
        action: BackupAction,
        path: EntryPath,
        source: Option<Entry>,
        target: Option<Entry>,
    ) -> Self {
        Self {
            action,
            path,
            source,
            target,
            method: EqualityMethods::NONE,
        }
    }

    /// Attach the methods that detected a difference
    pub fn with_method(mut self, method: EqualityMethods) -> Self {
        self.method = method;
        self
    }

    /// The entry the action is about
    ///
    /// Deletions are about the target entry, everything else about the source.
    pub fn subject(&self) -> Option<&Entry> {
        match self.action {
            BackupAction::Deleting | BackupAction::Deleted => self.target.as_ref(),
            _ => self.source.as_ref().or(self.target.as_ref()),
        }
    }
}

/// A failed attempt of a retried operation
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    /// Short description of the operation
    pub operation: &'a str,
    /// Failure of this attempt
    pub error: &'a Error,
    /// Number of failed attempts so far, starting at 1
    pub attempt: u32,
    /// Whether another attempt will be made if the observer proceeds
    pub will_retry: bool,
}

/// Progress of one file copy
#[derive(Debug, Clone)]
pub struct CopyProgress {
    /// Directory names from the sync root
    pub path: EntryPath,
    /// File being read
    pub source: Entry,
    /// Directory being written
    pub target: Entry,
    /// Bytes read so far
    pub position: u64,
    /// Total length, or [`ferrobackup_types::UNKNOWN_LENGTH`]
    pub length: i64,
}

/// Receives backup notifications
pub trait BackupObserver: Send + Sync {
    /// Entry state transition; the return value matters for cancellable actions
    fn on_action(&self, _event: &ActionEvent) -> Decision {
        Decision::Proceed
    }

    /// Failed attempt; [`Decision::Skip`] stops retrying
    fn on_error(&self, _event: &ErrorEvent<'_>) -> Decision {
        Decision::Proceed
    }

    /// Copy progress, raised for each chunk read from the source
    fn on_copying(&self, _event: &CopyProgress) {}
}

/// Observer that accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BackupObserver for NoopObserver {}

/// Fans notifications out to several observers
///
/// A veto from any observer skips the action. Every observer still sees
/// every notification.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn BackupObserver>>,
}

impl CompositeObserver {
    /// Create an empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn with(mut self, observer: Arc<dyn BackupObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True when no observer is registered
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl BackupObserver for CompositeObserver {
    fn on_action(&self, event: &ActionEvent) -> Decision {
        self.observers
            .iter()
            .map(|observer| observer.on_action(event))
            .fold(Decision::Proceed, |acc, decision| {
                if decision.is_skip() {
                    Decision::Skip
                } else {
                    acc
                }
            })
    }

    fn on_error(&self, event: &ErrorEvent<'_>) -> Decision {
        self.observers
            .iter()
            .map(|observer| observer.on_error(event))
            .fold(Decision::Proceed, |acc, decision| {
                if decision.is_skip() {
                    Decision::Skip
                } else {
                    acc
                }
            })
    }

    fn on_copying(&self, event: &CopyProgress) {
        for observer in &self.observers {
            observer.on_copying(event);
        }
    }
}
