//! Bounded retry for backend operations

use crate::events::{BackupObserver, ErrorEvent};
use ferrobackup_types::{CancellationToken, Error, Result, RetryConfig};
use std::future::Future;
use tracing::{debug, warn};

/// Runs fallible operations with a fixed backoff between attempts
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The policy configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or the policy gives up
    ///
    /// Every failure raises an error notification. The policy gives up when
    /// the observer answers [`crate::Decision::Skip`], when the retries are
    /// exhausted or when the failure is not retryable. Giving up yields
    /// `Ok(None)` under `continue_on_error` and the last error otherwise.
    /// Cancellation is always propagated as [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        observer: &dyn BackupObserver,
        ct: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let error = match attempt_fn().await {
                Ok(value) => return Ok(Some(value)),
                Err(error) => error,
            };
            if error.is_cancelled() {
                return Err(error);
            }

            attempt += 1;
            let will_retry = error.is_retryable() && attempt <= self.config.max_retries;
            let decision = observer.on_error(&ErrorEvent {
                operation,
                error: &error,
                attempt,
                will_retry,
            });

            if !will_retry || decision.is_skip() {
                return self.give_up(operation, error);
            }

            debug!(
                "Retrying {} (attempt {}/{}) after error: {}",
                operation, attempt, self.config.max_retries, error
            );
            tokio::select! {
                () = ct.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(self.config.delay) => {}
            }
        }
    }

    fn give_up<T>(&self, operation: &str, error: Error) -> Result<Option<T>> {
        if self.config.continue_on_error {
            warn!("Skipping {} after error: {}", operation, error);
            Ok(None)
        } else {
            Err(error)
        }
    }
}
