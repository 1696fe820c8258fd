//! Result type alias for FerroBackup operations

use crate::Error;

/// Result type alias for FerroBackup operations
pub type Result<T> = std::result::Result<T, Error>;
