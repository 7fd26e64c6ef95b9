//! Retry and timeout wrapping for component bodies.
//!
//! A component that declares an [`ExecutionWrapper`] gets per-attempt
//! timeouts and exponential-backoff retries. The wrapper observes the
//! invocation's cancellation token between attempts and during backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::component::ComponentError;
use crate::context::ExecutionContext;

/// Exponential backoff retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per additional failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after `failures` consecutive failed attempts (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Retry/timeout behaviour layered under a component body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionWrapper {
    /// Limit applied to each attempt.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
}

impl ExecutionWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// True when the wrapper adds nothing.
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.retry.is_none()
    }

    fn max_attempts(&self) -> u32 {
        self.retry.as_ref().map(|r| r.max_attempts.max(1)).unwrap_or(1)
    }

    /// Run `op` under this wrapper. `op` is called once per attempt with a
    /// context whose `attempt` field is set.
    pub async fn run<T, F, Fut>(&self, ctx: &ExecutionContext, mut op: F) -> Result<T, ComponentError>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, ComponentError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            ctx.checkpoint()?;

            let mut attempt_ctx = ctx.clone();
            attempt_ctx.attempt = attempt;
            let fut = op(attempt_ctx);

            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(ComponentError::Timeout(limit)),
                },
                None => fut.await,
            };

            match (result, &self.retry) {
                (Ok(value), _) => {
                    if attempt > 1 {
                        debug!(component = %ctx.component_key, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                (Err(err), Some(retry)) if attempt < max_attempts && err.is_retryable() => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        component = %ctx.component_key,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(ComponentError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                (Err(err), _) => return Err(err),
            }
        }
    }
}
