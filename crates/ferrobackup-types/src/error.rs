//! Error types and handling for FerroBackup
//!
//! Every backend, the synchronization engine and the encryption decorator
//! report failures through [`Error`]. The engine relies on [`Error::is_retryable`]
//! and [`Error::is_cancelled`] to tell transient failures apart from cooperative
//! cancellation.

/// Main error type for FerroBackup operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Entry not found in a backend
    #[error("Entry not found: {path}")]
    NotFound {
        /// Path or name of the missing entry
        path: String,
    },

    /// Entry already exists and cannot be replaced
    #[error("Entry already exists: {path}")]
    AlreadyExists {
        /// Path or name of the conflicting entry
        path: String,
    },

    /// Backend reported a failure
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the backend failure
        message: String,
    },

    /// Encryption or decryption failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cipher failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Synchronization error
    #[error("Synchronization error: {message}")]
    Sync {
        /// Error message describing the synchronization issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Several work items failed during one run
    #[error("{} operation(s) failed, first: {}", .errors.len(), first_message(.errors))]
    Aggregate {
        /// Every failure collected while the run drained
        errors: Vec<Error>,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

fn first_message(errors: &[Error]) -> String {
    errors
        .first()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Backend errors
    Storage,
    /// Cipher errors
    Crypto,
    /// Configuration errors
    Config,
    /// Synchronization errors
    Sync,
    /// Cancellation
    Cancelled,
    /// Aggregated failures
    Aggregate,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::NotFound { .. } | Self::AlreadyExists { .. } => ErrorKind::Io,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Crypto { .. } => ErrorKind::Crypto,
            Self::Config { .. } => ErrorKind::Config,
            Self::Sync { .. } => ErrorKind::Sync,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aggregate { .. } => ErrorKind::Aggregate,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Check if a failed operation may be attempted again
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::Config { .. } | Self::Crypto { .. } | Self::Aggregate { .. }
        )
    }

    /// Check if this error represents cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Aggregate { errors } => !errors.is_empty() && errors.iter().all(Self::is_cancelled),
            _ => false,
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new crypto error
    pub fn crypto<S: Into<String>>(message: S) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new sync error
    pub fn sync<S: Into<String>>(message: S) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        // Streams report our own errors wrapped in io::Error; unwrap them.
        let error = match error.get_ref().map(|inner| inner.is::<Self>()) {
            Some(true) => match error.into_inner().map(|inner| inner.downcast::<Self>()) {
                Some(Ok(inner)) => return *inner,
                _ => return Self::other("wrapped error could not be recovered"),
            },
            _ => error,
        };

        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: error.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                path: error.to_string(),
            },
            _ => Self::Io {
                message: error.to_string(),
            },
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::NotFound { .. } => std::io::ErrorKind::NotFound,
            Error::AlreadyExists { .. } => std::io::ErrorKind::AlreadyExists,
            Error::Crypto { .. } => std::io::ErrorKind::InvalidData,
            Error::Cancelled => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, error)
    }
}
