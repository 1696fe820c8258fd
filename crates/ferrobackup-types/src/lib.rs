//! Core type system and storage contract for FerroBackup
//!
//! This crate provides the foundational types shared by the synchronization
//! engine, the encryption decorator and every storage backend:
//!
//! - **Error handling**: one error enum with kinds and retry classification
//! - **Storage contract**: async traits for providers, directories and files
//! - **Equality methods**: the bit-set that drives file comparison
//! - **Configuration values**: retry and parallelism settings
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use ferrobackup_types::{EqualityMethods, ProviderConfiguration};
//!
//! let methods: EqualityMethods = "Length|Content".parse().unwrap();
//! assert!(methods.contains(EqualityMethods::CONTENT));
//!
//! let target = ProviderConfiguration::parse("memory://backups", "file");
//! assert_eq!(target.provider_name, "memory");
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{Parallelism, RetryConfig};
pub use error::{Error, ErrorKind};
pub use result::Result;
pub use traits::*;
pub use types::*;

/// Re-exported so backends and callers share one token type
pub use tokio_util::sync::CancellationToken;
