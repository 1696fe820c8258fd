//! Configuration value types shared by the engine and the CLI
//!
//! This module provides small validated value types. The layered run
//! configuration lives in `ferrobackup-config`.

use std::time::Duration;

/// Upper bound on concurrently executing work items
///
/// Zero means unbounded: every queued item may run as soon as it is dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parallelism(usize);

impl Parallelism {
    /// Maximum explicit bound
    pub const MAX: usize = 1024;

    /// Unbounded parallelism
    pub const UNBOUNDED: Self = Self(0);

    /// Create a new parallelism bound with validation
    pub fn new(limit: usize) -> Result<Self, String> {
        if limit > Self::MAX {
            Err(format!("Parallelism {} exceeds maximum {}", limit, Self::MAX))
        } else {
            Ok(Self(limit))
        }
    }

    /// Get the explicit limit, `None` when unbounded
    pub fn limit(self) -> Option<usize> {
        (self.0 > 0).then_some(self.0)
    }

    /// Get the raw value (0 = unbounded)
    pub fn get(self) -> usize {
        self.0
    }

    /// Bound derived from the host's available parallelism
    pub fn optimal() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self(cpu_count.min(Self::MAX))
    }
}

/// Retry configuration for backend operations
///
/// `max_retries` counts the attempts made after the first failure, so an
/// operation runs at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Skip the failed unit of work instead of failing the run
    pub continue_on_error: bool,
}

impl RetryConfig {
    /// Default number of retries
    pub const DEFAULT_RETRIES: u32 = 3;
    /// Default delay between attempts
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
    /// Longest accepted delay
    pub const MAX_DELAY: Duration = Duration::from_secs(3600);

    /// Create a new retry configuration
    pub fn new(max_retries: u32, delay: Duration, continue_on_error: bool) -> Result<Self, String> {
        if delay > Self::MAX_DELAY {
            return Err(format!(
                "Retry delay {:?} exceeds maximum {:?}",
                delay,
                Self::MAX_DELAY
            ));
        }
        Ok(Self {
            max_retries,
            delay,
            continue_on_error,
        })
    }

    /// Configuration that never retries and never waits
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            continue_on_error: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_RETRIES,
            delay: Self::DEFAULT_DELAY,
            continue_on_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallelism_bounds() {
        assert_eq!(Parallelism::new(0).unwrap().limit(), None);
        assert_eq!(Parallelism::new(8).unwrap().limit(), Some(8));
        assert!(Parallelism::new(Parallelism::MAX + 1).is_err());
        assert!(Parallelism::optimal().limit().is_some());
        assert_eq!(Parallelism::default(), Parallelism::UNBOUNDED);
    }

    #[test]
    fn test_retry_config_validation() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.delay, Duration::from_secs(1));
        assert!(!config.continue_on_error);

        assert!(RetryConfig::new(1, Duration::from_secs(7200), false).is_err());
        assert!(RetryConfig::new(5, Duration::from_millis(10), true).is_ok());
    }
}
