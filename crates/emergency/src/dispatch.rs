//! Per-channel delivery with bounded retry.

use campus_channels::{EmergencyNotice, NotificationDispatcher};
use campus_core::config::EmergencyConfig;
use campus_core::types::{DeliveryOutcome, DispatchChannel};
use std::time::Duration;
use tracing::{debug, warn};

/// Where one channel of the fan-out delivers to.
#[derive(Debug, Clone)]
pub enum Target {
    Recipient(String),
    /// Live subscribers near the alert.
    Nearby,
    /// The channel applies but cannot be reached at all.
    Unreachable(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmergencyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Send through `dispatcher` until success, a permanent failure, or the
/// attempt budget runs out. A timed-out attempt counts as transient.
/// Returns the attempts used and the terminal outcome.
pub async fn deliver_with_retry(
    dispatcher: &dyn NotificationDispatcher,
    policy: RetryPolicy,
    channel: DispatchChannel,
    recipient: &str,
    notice: &EmergencyNotice,
) -> (u32, DeliveryOutcome) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        metrics::counter!("emergency.dispatch.attempts", "channel" => channel.display_name())
            .increment(1);

        let outcome = tokio::time::timeout(
            policy.attempt_timeout,
            dispatcher.send(channel, recipient, notice),
        )
        .await
        .unwrap_or_else(|_| DeliveryOutcome::transient("attempt timed out"));

        match outcome {
            DeliveryOutcome::TransientFailure { ref reason } if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    alert_id = %notice.alert_id,
                    channel = channel.display_name(),
                    attempt,
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "Transient dispatch failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            DeliveryOutcome::Success => return (attempt, outcome),
            _ => {
                warn!(
                    alert_id = %notice.alert_id,
                    channel = channel.display_name(),
                    attempt,
                    "Channel dispatch failed"
                );
                return (attempt, outcome);
            }
        }
    }
}
