//! The boundary to external notification providers.

use crate::notice::EmergencyNotice;
use async_trait::async_trait;
use campus_core::types::{DeliveryOutcome, DispatchChannel};

/// Delivers one notice to one recipient over one channel.
///
/// Implementations must not panic; every failure is reported as an outcome.
/// Transient failures may be retried by the caller, permanent ones are not.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        channel: DispatchChannel,
        recipient: &str,
        notice: &EmergencyNotice,
    ) -> DeliveryOutcome;
}

/// Show the first eight characters of a recipient in logs.
pub fn mask_recipient(recipient: &str) -> String {
    let visible: String = recipient.chars().take(8).collect();
    format!("{visible}****")
}
