//! Retry/backoff controller for source calls.
//!
//! Each attempt is classified into an explicit [`Attempt`]; a small loop
//! consumes those and decides whether to wait and try again. Transient errors
//! (timeout, rate limiting, 5xx, connection failures) are retried with
//! exponential backoff; permanent ones end the loop immediately.
//!
//! Per-request timeouts belong to the HTTP clients, which start the clock
//! only once the source's rate budget has released the request. Waiting for
//! budget is never reported as a timeout.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::domain::SourceError;
use crate::config::RetryConfig;

/// Cap on the exponent so delays can't overflow
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Classified result of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Transient(SourceError),
    Permanent(SourceError),
}

impl<T> From<Result<T, SourceError>> for Attempt<T> {
    fn from(result: Result<T, SourceError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_transient() => Attempt::Transient(e),
            Err(e) => Attempt::Permanent(e),
        }
    }
}

/// What happened on one attempt, for traces
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// `None` on success
    pub error: Option<SourceError>,
    /// Wait before the next attempt, if one was scheduled
    pub retry_after: Option<Duration>,
}

/// Final result plus per-attempt history
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, SourceError>,
    pub history: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        self.history.len() as u32
    }
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the given (1-based) failed attempt:
    /// `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let multiplier = 1u32 << exponent;
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter && !delay.is_zero() {
            // Between half and the full delay
            let factor = rand::rng().random_range(0.5..=1.0);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut history = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match Attempt::from(op().await) {
                Attempt::Success(value) => {
                    history.push(AttemptRecord {
                        attempt,
                        error: None,
                        retry_after: None,
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        history,
                    };
                }
                Attempt::Transient(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    history.push(AttemptRecord {
                        attempt,
                        error: Some(e),
                        retry_after: Some(delay),
                    });
                    tokio::time::sleep(delay).await;
                }
                Attempt::Transient(e) | Attempt::Permanent(e) => {
                    history.push(AttemptRecord {
                        attempt,
                        error: Some(e.clone()),
                        retry_after: None,
                    });
                    return RetryOutcome {
                        result: Err(e),
                        history,
                    };
                }
            }
        }
    }
}
