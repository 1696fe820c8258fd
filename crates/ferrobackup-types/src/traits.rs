//! Storage contract implemented by every backend
//!
//! Entries are thin handles: they do not own a backend connection and are
//! created fresh by each listing call. All operations are asynchronous and
//! take the run's cancellation token so backends can stop early.

use crate::{HashAlgorithm, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Sequential byte stream returned by reads and consumed by writes
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// Precomputed content digests exposed by some backends
pub trait HashProvider: Send + Sync {
    /// Digest of the file content, `None` when unavailable for this algorithm
    fn hash(&self, algorithm: HashAlgorithm) -> Option<Vec<u8>>;
}

/// Operations shared by files and directories
#[async_trait]
pub trait StorageEntry: Send + Sync + fmt::Debug {
    /// Entry name, without any path component
    fn name(&self) -> &str;

    /// Creation time in UTC
    fn created_utc(&self) -> DateTime<Utc>;

    /// Last write time in UTC
    fn modified_utc(&self) -> DateTime<Utc>;

    /// Backend-specific absolute location, when the backend has one
    fn full_path(&self) -> Option<String> {
        None
    }

    /// Remove the entry; directories are removed with their content
    async fn delete(&self, ct: &CancellationToken) -> Result<()>;
}

/// File handle
#[async_trait]
pub trait FileEntry: StorageEntry {
    /// Length in bytes, or [`crate::UNKNOWN_LENGTH`]
    fn length(&self) -> i64;

    /// Open the content for sequential reading
    async fn open_read(&self, ct: &CancellationToken) -> Result<ContentStream>;

    /// Precomputed hashes, when the backend offers them
    fn hash_provider(&self) -> Option<&dyn HashProvider> {
        None
    }
}

/// Directory handle
#[async_trait]
pub trait DirectoryEntry: StorageEntry {
    /// List the direct children
    async fn list_children(&self, ct: &CancellationToken) -> Result<Vec<Entry>>;

    /// Create or replace a child file from `content`
    ///
    /// `length` is a hint and may be [`crate::UNKNOWN_LENGTH`].
    async fn create_file(
        &self,
        name: &str,
        content: ContentStream,
        length: i64,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn FileEntry>>;

    /// Create a child directory, returning the existing one if present
    async fn create_directory(
        &self,
        name: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>>;
}

/// A storage backend
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// One-time configuration from backend options
    fn initialize(&mut self, _options: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Authenticate, for backends that need it
    async fn log_in(&self, _ct: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Release the session opened by [`StorageProvider::log_in`]
    async fn log_out(&self, _ct: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Open the directory at `path`, creating it when missing
    async fn get_or_create_root(
        &self,
        path: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>>;
}

/// A file or directory returned by a listing
#[derive(Clone, Debug)]
pub enum Entry {
    /// File handle
    File(Arc<dyn FileEntry>),
    /// Directory handle
    Directory(Arc<dyn DirectoryEntry>),
}

impl Entry {
    /// Entry name
    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => file.name(),
            Self::Directory(directory) => directory.name(),
        }
    }

    /// True for directories
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    /// True for files
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Creation time in UTC
    pub fn created_utc(&self) -> DateTime<Utc> {
        match self {
            Self::File(file) => file.created_utc(),
            Self::Directory(directory) => directory.created_utc(),
        }
    }

    /// Last write time in UTC
    pub fn modified_utc(&self) -> DateTime<Utc> {
        match self {
            Self::File(file) => file.modified_utc(),
            Self::Directory(directory) => directory.modified_utc(),
        }
    }

    /// Backend-specific absolute location
    pub fn full_path(&self) -> Option<String> {
        match self {
            Self::File(file) => file.full_path(),
            Self::Directory(directory) => directory.full_path(),
        }
    }

    /// File handle, if this is a file
    pub fn as_file(&self) -> Option<&Arc<dyn FileEntry>> {
        match self {
            Self::File(file) => Some(file),
            Self::Directory(_) => None,
        }
    }

    /// Directory handle, if this is a directory
    pub fn as_directory(&self) -> Option<&Arc<dyn DirectoryEntry>> {
        match self {
            Self::File(_) => None,
            Self::Directory(directory) => Some(directory),
        }
    }

    /// Remove the entry from its backend
    pub async fn delete(&self, ct: &CancellationToken) -> Result<()> {
        match self {
            Self::File(file) => file.delete(ct).await,
            Self::Directory(directory) => directory.delete(ct).await,
        }
    }

    /// Same name (case-insensitive) and same kind
    pub fn matches(&self, other: &Self) -> bool {
        self.is_directory() == other.is_directory() && names_equal(self.name(), other.name())
    }
}

impl From<Arc<dyn FileEntry>> for Entry {
    fn from(file: Arc<dyn FileEntry>) -> Self {
        Self::File(file)
    }
}

impl From<Arc<dyn DirectoryEntry>> for Entry {
    fn from(directory: Arc<dyn DirectoryEntry>) -> Self {
        Self::Directory(directory)
    }
}

/// Case-insensitive entry name comparison
pub fn names_equal(left: &str, right: &str) -> bool {
    left.len() == right.len() && left.eq_ignore_ascii_case(right)
        || left.to_lowercase() == right.to_lowercase()
}

/// Find the entry of `items` with the same name and kind as `entry`
pub fn find_counterpart<'a>(items: &'a [Entry], entry: &Entry) -> Option<&'a Entry> {
    items.iter().find(|item| item.matches(entry))
}
