//! Local filesystem backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferrobackup_types::{
    CancellationToken, ContentStream, DirectoryEntry, Entry, Error, FileEntry, Result,
    StorageEntry, StorageProvider,
};
use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Backend option that lists dot-prefixed entries
pub const INCLUDE_HIDDEN_OPTION: &str = "include_hidden";

fn io_error(path: &Path, error: std::io::Error) -> Error {
    match error.kind() {
        std::io::ErrorKind::NotFound => Error::not_found(path.display().to_string()),
        std::io::ErrorKind::AlreadyExists => Error::AlreadyExists {
            path: path.display().to_string(),
        },
        _ => Error::io(format!("{}: {}", path.display(), error)),
    }
}

/// Errors raised by a decorating stream travel inside the io error
fn stream_error(path: &Path, error: std::io::Error) -> Error {
    if error.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        Error::from(error)
    } else {
        io_error(path, error)
    }
}

fn timestamp(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[derive(Debug, Clone, Copy)]
struct Times {
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl From<&Metadata> for Times {
    fn from(metadata: &Metadata) -> Self {
        let modified = timestamp(metadata.modified()).unwrap_or_else(Utc::now);
        // Not every platform records a creation time.
        let created = timestamp(metadata.created()).unwrap_or(modified);
        Self { created, modified }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Child names must stay inside their directory
fn validate_child_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::storage(format!("invalid entry name '{}'", name)));
    }
    Ok(())
}

/// A directory on the local filesystem
pub struct LocalDirectory {
    path: PathBuf,
    name: String,
    times: Times,
    include_hidden: bool,
}

impl LocalDirectory {
    async fn open(path: PathBuf, include_hidden: bool) -> Result<Self> {
        let metadata = fs::metadata(&path).await.map_err(|e| io_error(&path, e))?;
        if !metadata.is_dir() {
            return Err(Error::storage(format!("{} is not a directory", path.display())));
        }
        Ok(Self {
            name: file_name(&path),
            times: Times::from(&metadata),
            path,
            include_hidden,
        })
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for LocalDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalDirectory").field(&self.path).finish()
    }
}

/// A regular file on the local filesystem
pub struct LocalFile {
    path: PathBuf,
    name: String,
    length: i64,
    times: Times,
}

impl LocalFile {
    fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        Self {
            name: file_name(&path),
            length: metadata.len() as i64,
            times: Times::from(metadata),
            path,
        }
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalFile").field(&self.path).finish()
    }
}

#[async_trait]
impl StorageEntry for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.times.created
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        self.times.modified
    }

    fn full_path(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }

    async fn delete(&self, _ct: &CancellationToken) -> Result<()> {
        fs::remove_file(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

#[async_trait]
impl FileEntry for LocalFile {
    fn length(&self) -> i64 {
        self.length
    }

    async fn open_read(&self, _ct: &CancellationToken) -> Result<ContentStream> {
        let file = fs::File::open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        Ok(Box::pin(file))
    }
}

#[async_trait]
impl StorageEntry for LocalDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.times.created
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        self.times.modified
    }

    fn full_path(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }

    async fn delete(&self, _ct: &CancellationToken) -> Result<()> {
        fs::remove_dir_all(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

#[async_trait]
impl DirectoryEntry for LocalDirectory {
    async fn list_children(&self, ct: &CancellationToken) -> Result<Vec<Entry>> {
        let mut reader = fs::read_dir(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        let mut children = Vec::new();

        while let Some(child) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(&self.path, e))?
        {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let path = child.path();
            let Ok(name) = child.file_name().into_string() else {
                warn!("Skipping entry with a non UTF-8 name: {}", path.display());
                continue;
            };
            if !self.include_hidden && name.starts_with('.') {
                continue;
            }

            // Follows symlinks so linked content is backed up.
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("Skipping unreadable entry {}: {}", path.display(), error);
                    continue;
                }
            };

            if metadata.is_dir() {
                children.push(Entry::Directory(Arc::new(LocalDirectory {
                    name,
                    times: Times::from(&metadata),
                    path,
                    include_hidden: self.include_hidden,
                })));
            } else if metadata.is_file() {
                children.push(Entry::File(Arc::new(LocalFile::from_metadata(
                    path, &metadata,
                ))));
            }
        }

        Ok(children)
    }

    async fn create_file(
        &self,
        name: &str,
        mut content: ContentStream,
        _length: i64,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn FileEntry>> {
        validate_child_name(name)?;
        let path = self.path.join(name);
        // Dot-prefixed, so listings skip it while it is incomplete.
        let partial = self.path.join(format!(".{}.partial", name));

        let written = match write_partial(&partial, &mut content, ct).await {
            Ok(copied) => fs::rename(&partial, &path)
                .await
                .map(|()| copied)
                .map_err(|e| io_error(&path, e)),
            Err(error) => Err(error),
        };
        let copied = match written {
            Ok(copied) => copied,
            Err(error) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    debug!("Could not remove {}: {}", partial.display(), cleanup);
                }
                return Err(error);
            }
        };
        let metadata = fs::metadata(&path).await.map_err(|e| io_error(&path, e))?;
        debug!("Wrote {} bytes to {}", copied, path.display());

        Ok(Arc::new(LocalFile::from_metadata(path, &metadata)))
    }

    async fn create_directory(
        &self,
        name: &str,
        _ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        validate_child_name(name)?;
        let path = self.path.join(name);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(Arc::new(LocalDirectory::open(path, self.include_hidden).await?))
    }
}

async fn write_partial(
    path: &Path,
    content: &mut ContentStream,
    ct: &CancellationToken,
) -> Result<u64> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let copied = tokio::select! {
        () = ct.cancelled() => return Err(Error::Cancelled),
        copied = tokio::io::copy(content, &mut file) => copied.map_err(|e| stream_error(path, e))?,
    };
    file.flush().await.map_err(|e| io_error(path, e))?;
    Ok(copied)
}

/// Local filesystem provider
#[derive(Debug, Clone, Default)]
pub struct LocalProvider {
    include_hidden: bool,
}

impl LocalProvider {
    /// Create a provider that skips hidden entries
    pub fn new() -> Self {
        Self::default()
    }

    /// List dot-prefixed entries as well
    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn initialize(&mut self, options: &HashMap<String, String>) -> Result<()> {
        if let Some(value) = options.get(INCLUDE_HIDDEN_OPTION) {
            self.include_hidden = value.trim().parse().map_err(|_| {
                Error::config(format!(
                    "option '{}' expects true or false, got '{}'",
                    INCLUDE_HIDDEN_OPTION, value
                ))
            })?;
        }
        Ok(())
    }

    async fn get_or_create_root(
        &self,
        path: &str,
        _ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        let path = PathBuf::from(path);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(Arc::new(LocalDirectory::open(path, self.include_hidden).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn root(temp: &TempDir, include_hidden: bool) -> Arc<dyn DirectoryEntry> {
        LocalProvider::new()
            .with_hidden(include_hidden)
            .get_or_create_root(&temp.path().display().to_string(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[rstest]
    #[case(false, vec!["a.txt", "sub"])]
    #[case(true, vec![".hidden", "a.txt", "sub"])]
    #[tokio::test]
    async fn test_list_children(#[case] include_hidden: bool, #[case] expected: Vec<&str>) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"abc").unwrap();
        std::fs::write(temp.path().join(".hidden"), b"x").unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();

        let root = root(&temp, include_hidden).await;
        let children = root.list_children(&CancellationToken::new()).await.unwrap();
        let mut names: Vec<&str> = children.iter().map(Entry::name).collect();
        names.sort_unstable();

        assert_eq!(names, expected);
        let file = children.iter().find_map(Entry::as_file).unwrap();
        assert_eq!(file.length(), 3);
        assert!(file.full_path().unwrap().ends_with("a.txt"));
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let temp = TempDir::new().unwrap();
        let ct = CancellationToken::new();
        let root = root(&temp, false).await;

        let docs = root.create_directory("docs", &ct).await.unwrap();
        let content: ContentStream = Box::pin(std::io::Cursor::new(b"hello".to_vec()));
        let file = docs.create_file("note.txt", content, 5, &ct).await.unwrap();
        assert_eq!(file.length(), 5);

        let mut read = String::new();
        file.open_read(&ct)
            .await
            .unwrap()
            .read_to_string(&mut read)
            .await
            .unwrap();
        assert_eq!(read, "hello");

        docs.delete(&ct).await.unwrap();
        assert!(!temp.path().join("docs").exists());
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_previous_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"old").unwrap();
        let root = root(&temp, true).await;

        let content: ContentStream = Box::pin(
            tokio_test::io::Builder::new()
                .read(b"new con")
                .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "gone"))
                .build(),
        );
        let result = root
            .create_file("a.txt", content, 11, &CancellationToken::new())
            .await;

        assert!(result.err().unwrap().is_retryable());
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"old");
        let children = root.list_children(&CancellationToken::new()).await.unwrap();
        let names: Vec<&str> = children.iter().map(Entry::name).collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_create_file_replaces_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"old").unwrap();
        let root = root(&temp, false).await;

        let content: ContentStream = Box::pin(std::io::Cursor::new(b"newer".to_vec()));
        let file = root
            .create_file("a.txt", content, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(file.length(), 5);
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_create_file_rejects_path_names() {
        let temp = TempDir::new().unwrap();
        let root = root(&temp, false).await;
        let content: ContentStream = Box::pin(std::io::Cursor::new(Vec::new()));

        let result = root
            .create_file("../escape", content, 0, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_initialize_parses_hidden_option() {
        let mut provider = LocalProvider::new();
        let mut options = HashMap::new();
        options.insert(INCLUDE_HIDDEN_OPTION.to_string(), "true".to_string());
        provider.initialize(&options).unwrap();
        assert!(provider.include_hidden);

        options.insert(INCLUDE_HIDDEN_OPTION.to_string(), "maybe".to_string());
        assert!(provider.initialize(&options).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let temp = TempDir::new().unwrap();
        let file = LocalFile {
            path: temp.path().join("gone.txt"),
            name: "gone.txt".to_string(),
            length: 0,
            times: Times {
                created: Utc::now(),
                modified: Utc::now(),
            },
        };
        let error = file.open_read(&CancellationToken::new()).await.err().unwrap();
        assert!(matches!(error, Error::NotFound { .. }));
    }
}
