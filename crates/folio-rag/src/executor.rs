//! Resilient execution of calls against the generative backend
//!
//! Wraps any single backend call with a connectivity gate, bounded retries,
//! and exponential backoff. The executor is payload-agnostic: it receives an
//! opaque async operation and returns whatever the operation returns.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Shared connectivity flag, fed by the platform's network-path observer
///
/// The core only reads it; the host flips it as the device's network path
/// changes. Reads and writes may happen from different tasks, so the flag is
/// a plain atomic behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    /// Create a flag that starts online
    pub fn new() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_online(&self) {
        self.online.store(true, Ordering::Relaxed);
    }

    pub fn set_offline(&self) {
        self.online.store(false, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes backend calls with retry and backoff
pub struct RetryExecutor {
    connectivity: Connectivity,
    max_retries: u32,
    base_delay: Duration,
    cap_delay: Duration,
}

/// Random jitter ceiling added to every backoff delay
const JITTER_SECS: f64 = 0.3;

impl RetryExecutor {
    /// Create an executor from the backend configuration
    pub fn new(config: &LlmConfig, connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_secs_f64(config.retry_delay_base_secs.max(0.0)),
            cap_delay: Duration::from_secs_f64(config.retry_delay_cap_secs.max(0.0)),
        }
    }

    /// Run `operation`, retrying rate-limit failures with backoff
    ///
    /// The connectivity flag is checked before every attempt; an offline flag
    /// fails immediately without consuming an attempt. Quota, session, and
    /// connectivity errors from the operation itself abort at once; only
    /// rate-limit errors are retried, and the sleep happens strictly between
    /// attempts.
    pub async fn execute<F, Fut, T>(&self, service: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.max_retries {
            if !self.connectivity.is_online() {
                tracing::warn!(service, "skipping call: connection is offline");
                return Err(Error::offline());
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        service,
                        attempt,
                        max_attempts = self.max_retries,
                        error = %err,
                        "backend call failed"
                    );

                    if !err.is_retryable() {
                        return Err(err);
                    }

                    last_error = Some(err);
                    if attempt < self.max_retries {
                        sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::no_response("operation was never attempted")))
    }

    /// Delay before the attempt following `attempt` (1-based)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exponential.min(self.cap_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..JITTER_SECS);
        Duration::from_secs_f64(capped + jitter)
    }
}
