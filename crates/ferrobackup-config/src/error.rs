//! Errors raised while loading, merging or checking a run configuration

use ferrobackup_types::Error as BackupError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a run configuration could not be produced
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read or written
    #[error("cannot access configuration file {}: {source}", path.display())]
    File {
        /// The file involved
        path: PathBuf,
        /// What the filesystem reported
        source: std::io::Error,
    },

    /// A YAML, TOML or JSON document did not (de)serialize
    #[error("malformed configuration document: {message}")]
    Format {
        /// Serializer message
        message: String,
    },

    /// Defaults, files and environment variables could not be merged
    #[error("cannot merge configuration sources: {message}")]
    Sources {
        /// Layering message
        message: String,
    },

    /// A run-level setting is out of range
    #[error("invalid setting '{key}': {message}")]
    InvalidValue {
        /// Dotted setting name, e.g. `backup.retry_delay_ms`
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// A source or target endpoint is unusable
    #[error("invalid {side} endpoint, '{setting}' {message}")]
    Endpoint {
        /// `source` or `target`
        side: String,
        /// Setting within the endpoint, e.g. `encryption.password`
        setting: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::format(error)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        Self::Sources {
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(error: ConfigError) -> Self {
        BackupError::config(error.to_string())
    }
}

/// Result of configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Malformed document
    pub fn format(message: impl ToString) -> Self {
        Self::Format {
            message: message.to_string(),
        }
    }

    /// Out-of-range run-level setting
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Unusable endpoint setting
    pub fn endpoint<S: Into<String>>(side: &str, setting: &'static str, message: S) -> Self {
        Self::Endpoint {
            side: side.to_string(),
            setting,
            message: message.into(),
        }
    }
}
