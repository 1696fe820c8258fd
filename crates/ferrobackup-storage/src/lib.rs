//! Reference storage backends for FerroBackup
//!
//! - [`memory`]: a volatile tree, used by tests and dry runs
//! - [`local`]: the local filesystem through `tokio::fs`
//! - [`registry`]: maps provider names from the command line or
//!   configuration to backend constructors

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod local;
pub mod memory;
pub mod registry;

pub use local::{LocalDirectory, LocalFile, LocalProvider};
pub use memory::{MemoryDirectory, MemoryFile, MemoryProvider};
pub use registry::{ProviderFactory, ProviderRegistry};
