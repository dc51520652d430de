//! Status polling for background responses.

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::SidestreamError;
use crate::protocol::TaskStatus;
use crate::provider::{CompletionBackend, ResponseSnapshot};
use crate::util::retry::millis;

/// Backoff schedule for [`poll_background_response`].
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[builder(default = Duration::from_secs(2))]
    #[serde(rename = "initial_interval_ms", with = "millis")]
    pub initial_interval: Duration,
    #[builder(default = 1.5)]
    pub backoff_multiplier: f64,
    #[builder(default = Duration::from_secs(10))]
    #[serde(rename = "max_interval_ms", with = "millis")]
    pub max_interval: Duration,
    /// Matches the provider's retention window for background results.
    #[builder(default = Duration::from_secs(600))]
    #[serde(rename = "max_poll_time_ms", with = "millis")]
    pub max_poll_time: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PollConfig {
    fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
        Duration::from_secs_f64(grown.min(self.max_interval.as_secs_f64()))
    }
}

/// Fetch `response_id` until it reaches a terminal status.
///
/// `on_status_update` runs once per observed status change. Fails with
/// [`SidestreamError::PollTimeout`] once `max_poll_time` has elapsed.
pub async fn poll_background_response<F>(
    backend: &dyn CompletionBackend,
    response_id: &str,
    config: &PollConfig,
    mut on_status_update: F,
) -> Result<ResponseSnapshot, SidestreamError>
where
    F: FnMut(TaskStatus) + Send,
{
    let started = Instant::now();
    let mut interval = config.initial_interval.min(config.max_interval);
    let mut last_status: Option<TaskStatus> = None;

    loop {
        let snapshot = backend.retrieve(response_id).await?;
        if let Some(status) = snapshot.status {
            if last_status != Some(status) {
                last_status = Some(status);
                on_status_update(status);
            }
            if status.is_terminal() {
                return Ok(snapshot);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= config.max_poll_time {
            return Err(SidestreamError::PollTimeout {
                response_id: response_id.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        debug!(
            response_id,
            status = ?last_status,
            delay_ms = interval.as_millis() as u64,
            "background response still running"
        );
        tokio::time::sleep(interval).await;
        interval = config.next_interval(interval);
    }
}
