use std::future::Future;
use std::time::Duration;

use entity_store_core::StoreError;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::ExhaustedRetries;

/// Runs remote calls with a bounded number of attempts and a fixed pause
/// between failed attempts. Every remote store access goes through here.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    attempts: u32,
    delay: Duration,
}

impl RetryExecutor {
    /// Create an executor. At least one attempt is always made.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Call `call` until it succeeds or the attempt budget is spent.
    ///
    /// `operation` names the call in diagnostics. On exhaustion the last error
    /// is returned inside [`ExhaustedRetries`]; no call is made after that.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExhaustedRetries>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", operation, attempt, self.attempts);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        error = %err,
                        "{} failed",
                        operation
                    );
                    if attempt >= self.attempts {
                        return Err(ExhaustedRetries {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    attempt += 1;
                    sleep(self.delay).await;
                }
            }
        }
    }
}
