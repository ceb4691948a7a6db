//! Timeout-driven retry for remote client calls
//!
//! Each attempt runs under its own deadline; the deadline doubles after every
//! timed-out attempt (t, 2t, 4t, ...). Only timeouts are retried. Any other
//! error is returned to the caller straight away.
//!
//! A timed-out attempt is dropped, not aborted: if the future had handed work
//! to a blocking thread, that work may still run to completion.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::{ClientError, Result};
use crate::config::RetrySettings;

/// Runs a remote operation with an exponential timeout schedule
#[derive(Debug, Clone)]
pub struct Retrier {
    initial_timeout: Duration,
    retries: u32,
    delay: Duration,
}

impl Retrier {
    pub fn new(initial_timeout: Duration, retries: u32, delay: Duration) -> Self {
        Self {
            initial_timeout,
            retries,
            delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_secs(settings.initial_timeout_secs),
            settings.retries,
            Duration::from_millis(settings.delay_ms),
        )
    }

    /// Total number of attempts this retrier will make
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Run `operation`, retrying on timeout.
    ///
    /// `name` only labels log lines and the final `Timeout` error.
    pub async fn run<F, Fut, T>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut timeout = self.initial_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                operation = name,
                attempt,
                timeout_ms = timeout.as_millis() as u64,
                "Starting attempt"
            );

            match tokio::time::timeout(timeout, operation()).await {
                Ok(Err(ClientError::Timeout(_))) | Err(_) => {}
                Ok(result) => {
                    if attempt > 1 && result.is_ok() {
                        info!(operation = name, attempts = attempt, "Succeeded after retry");
                    }
                    return result;
                }
            }

            if attempt >= self.attempts() {
                warn!(operation = name, attempts = attempt, "Timed out on final attempt");
                return Err(ClientError::Timeout(name.to_string()));
            }

            warn!(
                operation = name,
                attempt,
                max_attempts = self.attempts(),
                "Attempt timed out, retrying"
            );
            tokio::time::sleep(self.delay).await;
            timeout *= 2;
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}
