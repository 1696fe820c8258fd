//! In-memory storage backend
//!
//! The whole tree lives behind `RwLock`s. Handles returned by listings are
//! the nodes themselves, so a deleted node simply stops being reachable from
//! its parent. Besides the storage contract the provider offers synchronous
//! helpers to seed and inspect trees in tests.

use chrono::{DateTime, Utc};
use digest::Digest;
use ferrobackup_types::{
    names_equal, CancellationToken, ContentStream, DirectoryEntry, Entry, Error, FileEntry,
    HashAlgorithm, HashProvider, Result, StorageEntry, StorageProvider,
};
use async_trait::async_trait;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::io::AsyncReadExt;

#[derive(Clone)]
enum Node {
    File(Arc<MemoryFile>),
    Directory(Arc<MemoryDirectory>),
}

impl Node {
    fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Directory(directory) => &directory.name,
        }
    }

    fn to_entry(&self) -> Entry {
        match self {
            Self::File(file) => Entry::File(file.clone()),
            Self::Directory(directory) => Entry::Directory(directory.clone()),
        }
    }
}

/// Directory node
pub struct MemoryDirectory {
    name: String,
    created: DateTime<Utc>,
    modified: RwLock<DateTime<Utc>>,
    this: Weak<MemoryDirectory>,
    parent: Weak<MemoryDirectory>,
    children: RwLock<Vec<Node>>,
    fail_listing: AtomicBool,
}

impl MemoryDirectory {
    fn new_node(name: &str, parent: Weak<Self>) -> Arc<Self> {
        let now = Utc::now();
        Arc::new_cyclic(|this| Self {
            name: name.to_string(),
            created: now,
            modified: RwLock::new(now),
            this: this.clone(),
            parent,
            children: RwLock::new(Vec::new()),
            fail_listing: AtomicBool::new(false),
        })
    }

    /// Make every later `list_children` fail with an I/O error
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    fn child(&self, name: &str) -> Option<Node> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|node| names_equal(node.name(), name))
            .cloned()
    }

    fn touch(&self) {
        *self.modified.write().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Existing child directory `name`, created when missing
    fn ensure_directory(&self, name: &str) -> Result<Arc<Self>> {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        match children.iter().find(|node| names_equal(node.name(), name)) {
            Some(Node::Directory(directory)) => return Ok(directory.clone()),
            Some(Node::File(_)) => {
                return Err(Error::AlreadyExists {
                    path: name.to_string(),
                })
            }
            None => {}
        }

        let directory = Self::new_node(name, self.this.clone());
        children.push(Node::Directory(directory.clone()));
        drop(children);
        self.touch();
        Ok(directory)
    }

    /// Store `content` as child file `name`, replacing a same-named file
    fn put_file(&self, name: &str, content: Vec<u8>) -> Result<Arc<MemoryFile>> {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        let existing = children
            .iter()
            .position(|node| names_equal(node.name(), name));
        let created = match existing.map(|index| &children[index]) {
            Some(Node::Directory(_)) => {
                return Err(Error::AlreadyExists {
                    path: name.to_string(),
                })
            }
            Some(Node::File(file)) => file.created,
            None => Utc::now(),
        };

        let file = Arc::new(MemoryFile {
            name: name.to_string(),
            created,
            modified: Utc::now(),
            content: Arc::from(content),
            parent: self.this.clone(),
            fail_reads: AtomicBool::new(false),
        });
        match existing {
            Some(index) => children[index] = Node::File(file.clone()),
            None => children.push(Node::File(file.clone())),
        }
        drop(children);
        self.touch();
        Ok(file)
    }

    fn detach(&self, name: &str) -> Result<()> {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        let before = children.len();
        children.retain(|node| node.name() != name);
        if children.len() == before {
            return Err(Error::not_found(name));
        }
        drop(children);
        self.touch();
        Ok(())
    }
}

impl fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryDirectory")
            .field("name", &self.name)
            .field("children", &children.len())
            .finish()
    }
}

/// File node
pub struct MemoryFile {
    name: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    content: Arc<[u8]>,
    parent: Weak<MemoryDirectory>,
    fail_reads: AtomicBool,
}

impl MemoryFile {
    /// The stored bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Make every later `open_read` fail with an I/O error
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFile")
            .field("name", &self.name)
            .field("length", &self.content.len())
            .finish()
    }
}

impl HashProvider for MemoryFile {
    fn hash(&self, algorithm: HashAlgorithm) -> Option<Vec<u8>> {
        let content = &self.content[..];
        Some(match algorithm {
            HashAlgorithm::Md5 => Md5::digest(content).to_vec(),
            HashAlgorithm::Sha1 => Sha1::digest(content).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(content).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(content).to_vec(),
        })
    }
}

#[async_trait]
impl StorageEntry for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.created
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        self.modified
    }

    async fn delete(&self, _ct: &CancellationToken) -> Result<()> {
        let parent = self
            .parent
            .upgrade()
            .ok_or_else(|| Error::not_found(self.name.clone()))?;
        parent.detach(&self.name)
    }
}

#[async_trait]
impl FileEntry for MemoryFile {
    fn length(&self) -> i64 {
        self.content.len() as i64
    }

    async fn open_read(&self, _ct: &CancellationToken) -> Result<ContentStream> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::io(format!("simulated read failure on '{}'", self.name)));
        }
        Ok(Box::pin(Cursor::new(self.content.clone())))
    }

    fn hash_provider(&self) -> Option<&dyn HashProvider> {
        Some(self)
    }
}

#[async_trait]
impl StorageEntry for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.created
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        *self.modified.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delete(&self, _ct: &CancellationToken) -> Result<()> {
        let parent = self
            .parent
            .upgrade()
            .ok_or_else(|| Error::storage("cannot delete the root directory"))?;
        parent.detach(&self.name)
    }
}

#[async_trait]
impl DirectoryEntry for MemoryDirectory {
    async fn list_children(&self, ct: &CancellationToken) -> Result<Vec<Entry>> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::io(format!("simulated listing failure on '{}'", self.name)));
        }
        let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
        Ok(children.iter().map(Node::to_entry).collect())
    }

    async fn create_file(
        &self,
        name: &str,
        mut content: ContentStream,
        length: i64,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn FileEntry>> {
        let mut buffer = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        tokio::select! {
            () = ct.cancelled() => return Err(Error::Cancelled),
            read = content.read_to_end(&mut buffer) => { read?; }
        }
        Ok(self.put_file(name, buffer)?)
    }

    async fn create_directory(
        &self,
        name: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.ensure_directory(name)?)
    }
}

/// In-memory storage provider
#[derive(Debug)]
pub struct MemoryProvider {
    root: Arc<MemoryDirectory>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|part| !part.is_empty()).collect()
}

fn is_directory_path(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}

impl MemoryProvider {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            root: MemoryDirectory::new_node("", Weak::new()),
        }
    }

    /// The root directory
    pub fn root(&self) -> Arc<MemoryDirectory> {
        self.root.clone()
    }

    fn walk(&self, parts: &[&str], create: bool) -> Option<Arc<MemoryDirectory>> {
        let mut directory = self.root.clone();
        for part in parts {
            directory = if create {
                directory.ensure_directory(part).ok()?
            } else {
                match directory.child(part)? {
                    Node::Directory(child) => child,
                    Node::File(_) => return None,
                }
            };
        }
        Some(directory)
    }

    fn node(&self, path: &str) -> Option<Node> {
        let parts = segments(path);
        let Some((last, parents)) = parts.split_last() else {
            return Some(Node::Directory(self.root.clone()));
        };
        let node = self.walk(parents, false)?.child(last)?;
        match (&node, is_directory_path(path)) {
            (Node::File(_), true) => None,
            _ => Some(node),
        }
    }

    /// Add an empty file, or a directory when `path` ends with `/`
    ///
    /// Missing parent directories are created.
    pub fn add_item(&self, path: &str) {
        if is_directory_path(path) {
            self.walk(&segments(path), true);
        } else {
            self.add_file(path, Vec::new());
        }
    }

    /// Add a file with `content`, creating missing parent directories
    pub fn add_file(&self, path: &str, content: Vec<u8>) {
        let parts = segments(path);
        if let Some((name, parents)) = parts.split_last() {
            if let Some(directory) = self.walk(parents, true) {
                // Seeding a path that collides with a directory is a no-op.
                let _ = directory.put_file(name, content);
            }
        }
    }

    /// True when `path` exists; a trailing `/` requires a directory
    pub fn has_item(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// File node at `path`
    pub fn file(&self, path: &str) -> Option<Arc<MemoryFile>> {
        match self.node(path)? {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }

    /// Directory node at `path`, `""` for the root
    pub fn directory(&self, path: &str) -> Option<Arc<MemoryDirectory>> {
        match self.node(path)? {
            Node::Directory(directory) => Some(directory),
            Node::File(_) => None,
        }
    }

    /// Content of the file at `path`
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.file(path).map(|file| file.content().to_vec())
    }

    /// Children of the root directory
    pub fn root_children(&self) -> Vec<Entry> {
        self.root
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Node::to_entry)
            .collect()
    }

    /// Names of the children of the directory at `path`
    pub fn child_names(&self, path: &str) -> Vec<String> {
        self.directory(path)
            .map(|directory| {
                directory
                    .children
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|node| node.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make reads of the file at `path` fail
    pub fn fail_reads(&self, path: &str) {
        if let Some(file) = self.file(path) {
            file.set_fail_reads(true);
        }
    }

    /// Make listings of the directory at `path` fail, `""` for the root
    pub fn fail_listing(&self, path: &str) {
        if let Some(directory) = self.directory(path) {
            directory.set_fail_listing(true);
        }
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn get_or_create_root(
        &self,
        path: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut directory = self.root.clone();
        for part in segments(path) {
            directory = directory.ensure_directory(part)?;
        }
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.txt", true)]
    #[case("A.TXT", true)]
    #[case("dir/", true)]
    #[case("dir", true)]
    #[case("a.txt/", false)]
    #[case("dir/nested/b.bin", true)]
    #[case("missing", false)]
    fn test_seed_and_lookup(#[case] path: &str, #[case] exists: bool) {
        let provider = MemoryProvider::new();
        provider.add_item("a.txt");
        provider.add_item("dir/");
        provider.add_file("dir/nested/b.bin", vec![1, 2]);

        assert_eq!(provider.has_item(path), exists);
    }

    #[tokio::test]
    async fn test_create_file_overwrites_case_insensitively() {
        let provider = MemoryProvider::new();
        provider.add_file("Report.txt", vec![1]);
        let root = provider.root();
        let ct = CancellationToken::new();

        let created = root
            .create_file("report.TXT", Box::pin(Cursor::new(vec![7, 8, 9])), 3, &ct)
            .await
            .unwrap();

        assert_eq!(created.length(), 3);
        assert_eq!(provider.root_children().len(), 1);
        assert_eq!(provider.read_file("report.txt").unwrap(), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_create_directory_returns_existing() {
        let provider = MemoryProvider::new();
        provider.add_file("docs/a.txt", vec![1]);
        let ct = CancellationToken::new();

        let docs = provider.root().create_directory("DOCS", &ct).await.unwrap();
        let children = docs.list_children(&ct).await.unwrap();

        assert_eq!(docs.name(), "docs");
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_detaches_subtree() {
        let provider = MemoryProvider::new();
        provider.add_file("docs/deep/a.txt", vec![1]);
        let ct = CancellationToken::new();

        let docs = Entry::Directory(provider.directory("docs").unwrap());
        docs.delete(&ct).await.unwrap();

        assert!(!provider.has_item("docs/"));
        assert!(!provider.has_item("docs/deep/a.txt"));
        assert!(provider.root().delete(&ct).await.is_err());
    }

    #[tokio::test]
    async fn test_read_and_fault_injection() {
        let provider = MemoryProvider::new();
        provider.add_file("a.bin", vec![4, 5, 6]);
        let file = provider.file("a.bin").unwrap();
        let ct = CancellationToken::new();

        let mut content = Vec::new();
        file.open_read(&ct)
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, vec![4, 5, 6]);

        provider.fail_reads("a.bin");
        let error = file.open_read(&ct).await.err().unwrap();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_listing_fault_injection() {
        let provider = MemoryProvider::new();
        provider.add_file("docs/a.txt", vec![1]);
        let ct = CancellationToken::new();

        provider.fail_listing("docs");
        let docs = provider.directory("docs").unwrap();
        assert!(docs.list_children(&ct).await.err().unwrap().is_retryable());
        assert_eq!(provider.root().list_children(&ct).await.unwrap().len(), 1);

        docs.set_fail_listing(false);
        assert_eq!(docs.list_children(&ct).await.unwrap().len(), 1);
    }

    #[test]
    fn test_hash_provider_digests_content() {
        let provider = MemoryProvider::new();
        provider.add_file("empty", Vec::new());
        let file = provider.file("empty").unwrap();
        let hashes = file.hash_provider().unwrap();

        let md5 = hashes.hash(HashAlgorithm::Md5).unwrap();
        assert_eq!(md5[..4], [0xd4, 0x1d, 0x8c, 0xd9]);
        assert_eq!(hashes.hash(HashAlgorithm::Sha512).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_get_or_create_root_builds_path() {
        let provider = MemoryProvider::new();
        let ct = CancellationToken::new();

        let root = provider.get_or_create_root("backups/2024", &ct).await.unwrap();
        assert_eq!(root.name(), "2024");
        assert!(provider.has_item("backups/2024/"));

        let again = provider.get_or_create_root("/backups/2024/", &ct).await.unwrap();
        assert_eq!(again.name(), "2024");
        assert_eq!(provider.child_names("backups"), vec!["2024".to_string()]);
    }
}
