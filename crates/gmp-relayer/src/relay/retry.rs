// Retry logic with exponential backoff for transient chain failures
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::GlobalConfig;
use crate::error::{ChainError, RelayError};
use crate::utils::backoff_with_jitter;

/// Retry budget for RPC calls made inside a poll or a submission
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Maximum retry delay in milliseconds (backoff cap)
    pub max_delay_ms: u64,
    /// Timeout for a single attempt
    pub operation_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            max_retries: global.max_retries,
            base_delay_ms: global.retry_delay_ms,
            max_delay_ms: global.max_retry_delay_ms,
            ..Self::default()
        }
    }

    /// Policy that never sleeps; used where the caller owns the retry cadence
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            operation_timeout: None,
        }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        backoff_with_jitter(retry, self.base_delay_ms, self.max_delay_ms)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Non-transient errors are returned at once as [`RelayError::Chain`]; an
    /// exhausted budget becomes [`RelayError::TransientChain`].
    pub async fn run<F, Fut, T>(&self, chain: &str, operation_name: &str, operation: F) -> Result<T, RelayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.operation_timeout {
                Some(limit) => match timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(ChainError::Transport(format!(
                        "{} timed out after {:?}",
                        operation_name, limit
                    ))),
                },
                None => operation().await,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(chain = %chain, operation = operation_name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() => {
                    if attempt > self.max_retries {
                        warn!(
                            chain = %chain,
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "retry budget exhausted"
                        );
                        return Err(RelayError::TransientChain {
                            chain: chain.to_string(),
                            attempts: attempt,
                            source: error,
                        });
                    }
                    let delay = self.delay(attempt - 1);
                    debug!(
                        chain = %chain,
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(error) => return Err(RelayError::Chain(error)),
            }
        }
    }
}
