//! Selective retry for backend reads

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::CacheConfig;
use crate::types::BackendResult;

/// Retries transient transport failures only.
///
/// Well-formed negative answers are `Ok` values and never reach the retry
/// loop; 4xx and decode failures are returned on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub transport_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transport_retries: 1,
            backoff: Duration::from_millis(100),
        }
    }
}

impl From<&CacheConfig> for RetryPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            transport_retries: config.transport_retries,
            backoff: config.retry_backoff,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            transport_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `call` until it succeeds, fails permanently, or retries run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts <= self.transport_retries => {
                    warn!(
                        call = %label,
                        attempt = attempts,
                        error = %e,
                        "Transient read failure, retrying"
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.delay(attempts)).await;
        }
    }

    /// Exponential backoff after the `attempt`-th failure
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Like [`run`](Self::run), with a "does not exist" answer as `Ok(None)`
    pub async fn run_optional<T, F, Fut>(&self, label: &str, call: F) -> BackendResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        match self.run(label, call).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
