//! Encrypting decorator over any storage provider
//!
//! Handles returned by [`AesProvider`] wrap the inner backend's handles.
//! Content is encrypted on the way in and decrypted on the way out, names
//! are (de)ciphered according to [`AesOptions`]. Callers cannot tell the
//! difference apart from file lengths, which are always reported as
//! unknown.

use crate::cipher::{ciphertext_len, Decryptor, Encryptor};
use crate::envelope::{AesVersion, Envelope, ENVELOPE_LEN};
use crate::key::{ContentKey, DEFAULT_ITERATIONS};
use crate::name::{decrypt_name, encrypt_name};
use crate::stream::{ConcatReader, DecryptReader, EncryptReader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferrobackup_config::{AesMethod, EncryptionConfig};
use ferrobackup_types::{
    CancellationToken, ContentStream, DirectoryEntry, Entry, Error, FileEntry, Result,
    StorageEntry, StorageProvider, UNKNOWN_LENGTH,
};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use zeroize::Zeroizing;

/// Settings of the encryption decorator
#[derive(Clone)]
pub struct AesOptions {
    /// Strength used for new payloads; reads follow each envelope
    pub version: AesVersion,
    password: Zeroizing<String>,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// Encrypt file names
    pub encrypt_file_names: bool,
    /// Encrypt directory names
    pub encrypt_directory_names: bool,
}

impl AesOptions {
    /// Options encrypting content and every name
    pub fn new(version: AesVersion, password: impl Into<String>) -> Self {
        Self {
            version,
            password: Zeroizing::new(password.into()),
            iterations: DEFAULT_ITERATIONS,
            encrypt_file_names: true,
            encrypt_directory_names: true,
        }
    }

    /// Set the PBKDF2 iteration count
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Choose which names are encrypted
    pub fn with_names(mut self, files: bool, directories: bool) -> Self {
        self.encrypt_file_names = files;
        self.encrypt_directory_names = directories;
        self
    }

    /// Build options from an endpoint's `encryption` section
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        if config.password.is_empty() {
            return Err(Error::config("encryption password must not be empty"));
        }
        if config.iterations == 0 {
            return Err(Error::config("encryption iterations must be greater than 0"));
        }
        let version = match config.method {
            AesMethod::Aes128 => AesVersion::Aes128,
            AesMethod::Aes256 => AesVersion::Aes256,
        };
        Ok(Self::new(version, config.password.clone())
            .with_iterations(config.iterations)
            .with_names(config.encrypt_file_names, config.encrypt_directory_names))
    }

    fn encrypts(&self, is_directory: bool) -> bool {
        if is_directory {
            self.encrypt_directory_names
        } else {
            self.encrypt_file_names
        }
    }

    fn plain_name(&self, inner_name: &str, is_directory: bool) -> String {
        if self.encrypts(is_directory) {
            decrypt_name(inner_name, &self.password, self.iterations)
        } else {
            inner_name.to_string()
        }
    }

    fn new_inner_name(&self, name: &str, is_directory: bool) -> Result<String> {
        if self.encrypts(is_directory) {
            encrypt_name(name, self.version, &self.password, self.iterations)
        } else {
            Ok(name.to_string())
        }
    }

    fn content_key(&self, envelope: &Envelope) -> Result<ContentKey> {
        ContentKey::derive(&self.password, &envelope.iv, self.iterations, envelope.version)
    }
}

impl fmt::Debug for AesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesOptions")
            .field("version", &self.version)
            .field("password", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .field("encrypt_file_names", &self.encrypt_file_names)
            .field("encrypt_directory_names", &self.encrypt_directory_names)
            .finish()
    }
}

fn wrap(options: &Arc<AesOptions>, entry: Entry) -> Entry {
    match entry {
        Entry::File(file) => Entry::File(Arc::new(AesFile::new(file, options.clone()))),
        Entry::Directory(directory) => {
            Entry::Directory(Arc::new(AesDirectory::new(directory, options.clone())))
        }
    }
}

/// Case-insensitive plaintext name and kind
type NameKey = (bool, String);

/// Decrypting view of an inner file
pub struct AesFile {
    inner: Arc<dyn FileEntry>,
    options: Arc<AesOptions>,
    name: String,
}

impl AesFile {
    fn new(inner: Arc<dyn FileEntry>, options: Arc<AesOptions>) -> Self {
        let name = options.plain_name(inner.name(), false);
        Self::named(inner, options, name)
    }

    fn named(inner: Arc<dyn FileEntry>, options: Arc<AesOptions>, name: String) -> Self {
        Self {
            inner,
            options,
            name,
        }
    }

    /// Name of the underlying ciphertext file
    pub fn inner_name(&self) -> &str {
        self.inner.name()
    }
}

impl fmt::Debug for AesFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesFile")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl StorageEntry for AesFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.inner.created_utc()
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        self.inner.modified_utc()
    }

    fn full_path(&self) -> Option<String> {
        self.inner.full_path()
    }

    async fn delete(&self, ct: &CancellationToken) -> Result<()> {
        self.inner.delete(ct).await
    }
}

#[async_trait]
impl FileEntry for AesFile {
    /// Plaintext length cannot be known without decrypting
    fn length(&self) -> i64 {
        UNKNOWN_LENGTH
    }

    async fn open_read(&self, ct: &CancellationToken) -> Result<ContentStream> {
        let mut stream = self.inner.open_read(ct).await?;
        let envelope = Envelope::read_from(&mut stream).await?;
        let key = self.options.content_key(&envelope)?;
        let decryptor = Decryptor::new(envelope.version, &key, &envelope.iv)?;
        Ok(Box::pin(DecryptReader::new(stream, decryptor)))
    }
}

/// Encrypting view of an inner directory
pub struct AesDirectory {
    inner: Arc<dyn DirectoryEntry>,
    options: Arc<AesOptions>,
    name: String,
    /// Inner names by plaintext name, filled by the last listing
    known_names: Mutex<Option<HashMap<NameKey, String>>>,
}

impl AesDirectory {
    /// Wrap `inner` with `options`
    pub fn new(inner: Arc<dyn DirectoryEntry>, options: Arc<AesOptions>) -> Self {
        let name = options.plain_name(inner.name(), true);
        Self::named(inner, options, name)
    }

    fn named(inner: Arc<dyn DirectoryEntry>, options: Arc<AesOptions>, name: String) -> Self {
        Self {
            inner,
            options,
            name,
            known_names: Mutex::new(None),
        }
    }

    fn key(name: &str, is_directory: bool) -> NameKey {
        (is_directory, name.to_lowercase())
    }

    fn remember(&self, name: &str, is_directory: bool, inner_name: &str) {
        let mut known = self.known_names.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = known.as_mut() {
            known.insert(Self::key(name, is_directory), inner_name.to_string());
        }
    }

    /// Inner name to store `name` under
    ///
    /// An existing entry with the same plaintext name keeps its inner name so
    /// writes replace it.
    async fn inner_name_for(&self, name: &str, is_directory: bool, ct: &CancellationToken) -> Result<String> {
        if !self.options.encrypts(is_directory) {
            return Ok(name.to_string());
        }

        let cached = self
            .known_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|known| known.get(&Self::key(name, is_directory)).cloned());
        let existing = match cached {
            Some(existing) => existing,
            None => {
                self.list_children(ct).await?;
                self.known_names
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .and_then(|known| known.get(&Self::key(name, is_directory)).cloned())
            }
        };

        match existing {
            Some(inner_name) => Ok(inner_name),
            None => self.options.new_inner_name(name, is_directory),
        }
    }
}

impl fmt::Debug for AesDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesDirectory")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl StorageEntry for AesDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.inner.created_utc()
    }

    fn modified_utc(&self) -> DateTime<Utc> {
        self.inner.modified_utc()
    }

    fn full_path(&self) -> Option<String> {
        self.inner.full_path()
    }

    async fn delete(&self, ct: &CancellationToken) -> Result<()> {
        self.inner.delete(ct).await
    }
}

#[async_trait]
impl DirectoryEntry for AesDirectory {
    async fn list_children(&self, ct: &CancellationToken) -> Result<Vec<Entry>> {
        let inner_children = self.inner.list_children(ct).await?;
        let mut known = HashMap::with_capacity(inner_children.len());
        let mut children = Vec::with_capacity(inner_children.len());

        for child in inner_children {
            let inner_name = child.name().to_string();
            let child = wrap(&self.options, child);
            if self.options.encrypts(child.is_directory()) {
                known.insert(Self::key(child.name(), child.is_directory()), inner_name);
            }
            children.push(child);
        }
        *self.known_names.lock().unwrap_or_else(PoisonError::into_inner) = Some(known);

        Ok(children)
    }

    async fn create_file(
        &self,
        name: &str,
        content: ContentStream,
        length: i64,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn FileEntry>> {
        let inner_name = self.inner_name_for(name, false, ct).await?;
        let envelope = Envelope::generate(self.options.version);
        let key = self.options.content_key(&envelope)?;
        let encryptor = Encryptor::new(envelope.version, &key, &envelope.iv)?;

        let header: ContentStream = Box::pin(Cursor::new(envelope.to_bytes()));
        let body: ContentStream = Box::pin(EncryptReader::new(content, encryptor));
        let hint = u64::try_from(length).map_or(UNKNOWN_LENGTH, |length| {
            (ENVELOPE_LEN as u64 + ciphertext_len(length)) as i64
        });
        debug!("Encrypting '{}' ({}) into '{}'", name, envelope.version, inner_name);

        let created = self
            .inner
            .create_file(&inner_name, Box::pin(ConcatReader::new([header, body])), hint, ct)
            .await?;
        self.remember(name, false, &inner_name);
        Ok(Arc::new(AesFile::named(
            created,
            self.options.clone(),
            name.to_string(),
        )))
    }

    async fn create_directory(
        &self,
        name: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        let inner_name = self.inner_name_for(name, true, ct).await?;
        let created = self.inner.create_directory(&inner_name, ct).await?;
        self.remember(name, true, &inner_name);

        Ok(Arc::new(AesDirectory::named(
            created,
            self.options.clone(),
            name.to_string(),
        )))
    }
}

/// Storage provider that encrypts everything written through it
pub struct AesProvider {
    inner: Arc<dyn StorageProvider>,
    options: Arc<AesOptions>,
}

impl AesProvider {
    /// Decorate `inner`
    pub fn new(inner: Arc<dyn StorageProvider>, options: AesOptions) -> Self {
        Self {
            inner,
            options: Arc::new(options),
        }
    }

    /// The decorator settings
    pub fn options(&self) -> &AesOptions {
        &self.options
    }
}

impl fmt::Debug for AesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesProvider")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageProvider for AesProvider {
    fn initialize(&mut self, options: &HashMap<String, String>) -> Result<()> {
        Arc::get_mut(&mut self.inner)
            .ok_or_else(|| Error::config("cannot initialize a provider that is already shared"))?
            .initialize(options)
    }

    async fn log_in(&self, ct: &CancellationToken) -> Result<()> {
        self.inner.log_in(ct).await
    }

    async fn log_out(&self, ct: &CancellationToken) -> Result<()> {
        self.inner.log_out(ct).await
    }

    async fn get_or_create_root(
        &self,
        path: &str,
        ct: &CancellationToken,
    ) -> Result<Arc<dyn DirectoryEntry>> {
        let root = self.inner.get_or_create_root(path, ct).await?;
        Ok(Arc::new(AesDirectory::new(root, self.options.clone())))
    }
}
