//! Configuration management for FerroBackup
//!
//! Run options are layered: built-in defaults, then an optional YAML, TOML or
//! JSON file, then `FERROBACKUP__SECTION__KEY` environment variables. The CLI
//! applies its own flags on top of the loaded [`Config`].
//!
//! # Examples
//!
//! ```rust
//! use ferrobackup_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .build()
//!     .expect("defaults are valid");
//!
//! assert_eq!(config.backup.retry_count, 3);
//! assert!(!config.backup.can_delete_files);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use ferrobackup_types::{EqualityMethods, Parallelism, ProviderConfiguration, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for FerroBackup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Synchronization policy
    pub backup: BackupConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Source endpoint, usually given on the command line
    pub source: Option<EndpointConfig>,
    /// Target endpoint, usually given on the command line
    pub target: Option<EndpointConfig>,
}

/// Synchronization policy for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Retries after the first failed attempt of a backend operation
    pub retry_count: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Skip failed work items instead of failing the run
    pub continue_on_error: bool,
    /// Create target directories missing from the target
    pub can_create_directories: bool,
    /// Delete target directories missing from the source
    pub can_delete_directories: bool,
    /// Create target files missing from the target
    pub can_create_files: bool,
    /// Overwrite (or version) target files that differ
    pub can_update_files: bool,
    /// Delete target files missing from the source
    pub can_delete_files: bool,
    /// Methods used to decide whether two files differ
    pub equality_methods: EqualityMethods,
    /// Compare against the newest history version instead of the live file
    pub read_history: bool,
    /// Write updates as new history versions
    pub write_history: bool,
    /// Shorthand enabling both `read_history` and `write_history`
    pub keep_history: bool,
    /// Concurrent work items, 0 = unbounded
    pub max_parallelism: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retry_count: RetryConfig::DEFAULT_RETRIES,
            retry_delay_ms: RetryConfig::DEFAULT_DELAY.as_millis() as u64,
            continue_on_error: false,
            can_create_directories: true,
            can_delete_directories: false,
            can_create_files: true,
            can_update_files: true,
            can_delete_files: false,
            equality_methods: EqualityMethods::DEFAULT,
            read_history: false,
            write_history: false,
            keep_history: false,
            max_parallelism: 0,
        }
    }
}

impl BackupConfig {
    /// History reading after applying `keep_history`
    pub fn effective_read_history(&self) -> bool {
        self.read_history || self.keep_history
    }

    /// History writing after applying `keep_history`
    pub fn effective_write_history(&self) -> bool {
        self.write_history || self.keep_history
    }

    /// Retry settings derived from this policy
    pub fn retry_config(&self) -> ConfigResult<RetryConfig> {
        RetryConfig::new(
            self.retry_count,
            Duration::from_millis(self.retry_delay_ms),
            self.continue_on_error,
        )
        .map_err(|message| ConfigError::invalid_value("backup.retry_delay_ms", message))
    }

    /// Parallelism bound derived from this policy
    pub fn parallelism(&self) -> ConfigResult<Parallelism> {
        Parallelism::new(self.max_parallelism)
            .map_err(|message| ConfigError::invalid_value("backup.max_parallelism", message))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Cipher strength for encrypted endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AesMethod {
    /// AES-128
    Aes128,
    /// AES-256
    #[default]
    Aes256,
}

impl std::str::FromStr for AesMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes128" | "aes-128" | "128" => Ok(Self::Aes128),
            "aes256" | "aes-256" | "256" => Ok(Self::Aes256),
            other => Err(format!("Unknown AES method '{}'", other)),
        }
    }
}

/// Transparent encryption settings for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Cipher strength
    pub method: AesMethod,
    /// Password used for key derivation
    pub password: String,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// Encrypt file names
    pub encrypt_file_names: bool,
    /// Encrypt directory names
    pub encrypt_directory_names: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            method: AesMethod::default(),
            password: String::new(),
            iterations: 10_000,
            encrypt_file_names: true,
            encrypt_directory_names: true,
        }
    }
}

/// One side of a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Registry name of the backend
    pub provider: String,
    /// Root path inside the backend
    pub path: String,
    /// Backend-specific options
    pub options: HashMap<String, String>,
    /// Optional encryption layered over the backend
    pub encryption: Option<EncryptionConfig>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            provider: "file".to_string(),
            path: String::new(),
            options: HashMap::new(),
            encryption: None,
        }
    }
}

impl EndpointConfig {
    /// Parse `provider://path`, bare paths select the local filesystem
    pub fn parse(endpoint: &str) -> Self {
        let provider = ProviderConfiguration::parse(endpoint, "file");
        Self {
            provider: provider.provider_name,
            path: provider.path,
            ..Self::default()
        }
    }

    /// Backend construction parameters
    pub fn provider_configuration(&self) -> ProviderConfiguration {
        ProviderConfiguration {
            provider_name: self.provider.clone(),
            path: self.path.clone(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_backup_defaults() {
        let backup = BackupConfig::default();
        assert_eq!(backup.retry_count, 3);
        assert!(backup.can_create_files && backup.can_create_directories && backup.can_update_files);
        assert!(!backup.can_delete_files && !backup.can_delete_directories);
        assert_eq!(backup.equality_methods, EqualityMethods::DEFAULT);
        assert_eq!(backup.parallelism().unwrap(), Parallelism::UNBOUNDED);
        assert_eq!(backup.retry_config().unwrap(), RetryConfig::default());
    }

    #[test]
    fn test_keep_history_shorthand() {
        let backup = BackupConfig {
            keep_history: true,
            ..BackupConfig::default()
        };
        assert!(backup.effective_read_history());
        assert!(backup.effective_write_history());
    }

    #[rstest]
    #[case("aes128", AesMethod::Aes128)]
    #[case("AES-256", AesMethod::Aes256)]
    #[case("256", AesMethod::Aes256)]
    fn test_parse_aes_method(#[case] input: &str, #[case] expected: AesMethod) {
        assert_eq!(input.parse::<AesMethod>().unwrap(), expected);
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint = EndpointConfig::parse("memory://vault");
        assert_eq!(endpoint.provider, "memory");
        assert_eq!(endpoint.provider_configuration().path, "vault");

        let local = EndpointConfig::parse("/srv/photos");
        assert_eq!(local.provider, "file");
        assert!(local.encryption.is_none());
    }
}
