//! Backoff for backend calls that fail before a stream is open.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SidestreamError;

/// Exponential backoff policy.
///
/// Only errors classified as retryable are retried. Once events have been
/// forwarded to a client, nothing is retried: a replayed stream would
/// duplicate content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, counting the first.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    /// Delay after `err`, honouring a rate-limit hint when the backend sent one.
    fn delay_after(&self, retry: u32, err: &SidestreamError) -> Duration {
        if let SidestreamError::RateLimited {
            retry_after_ms: Some(ms),
        } = err
        {
            return Duration::from_millis(*ms).min(self.max_backoff);
        }
        self.backoff(retry).mul_f64(jitter())
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, SidestreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SidestreamError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retry = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if retry + 1 >= attempts || !err.is_retryable() {
                return Err(err);
            }
            let delay = self.delay_after(retry, &err);
            tracing::warn!(
                attempt = retry + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying backend call"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

/// Uniform factor in `[0.75, 1.25)`.
fn jitter() -> f64 {
    let bits = (uuid::Uuid::new_v4().as_u128() & 0xffff) as f64;
    0.75 + bits / 65_536.0 * 0.5
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
