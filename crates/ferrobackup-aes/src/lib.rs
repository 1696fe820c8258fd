//! Transparent AES encryption for FerroBackup storage providers
//!
//! [`AesProvider`] decorates any [`ferrobackup_types::StorageProvider`]:
//! file content is written as an envelope (strength selector and random IV)
//! followed by AES-CBC ciphertext, keys are derived per payload with
//! PBKDF2-HMAC-SHA1 salted by the IV, and entry names can be encrypted the
//! same way and stored base64-encoded.
//!
//! # Examples
//!
//! ```rust,no_run
//! use ferrobackup_aes::{AesOptions, AesProvider, AesVersion};
//! use ferrobackup_storage::MemoryProvider;
//! use std::sync::Arc;
//!
//! let inner = Arc::new(MemoryProvider::new());
//! let encrypted = AesProvider::new(inner, AesOptions::new(AesVersion::Aes256, "secret"));
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cipher;
pub mod envelope;
pub mod key;
pub mod name;
pub mod provider;
pub mod stream;

pub use envelope::{AesVersion, Envelope, ENVELOPE_LEN};
pub use key::{ContentKey, DEFAULT_ITERATIONS};
pub use provider::{AesDirectory, AesFile, AesOptions, AesProvider};
pub use stream::{ConcatReader, DecryptReader, EncryptReader};
