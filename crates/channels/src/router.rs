//! Routes a notice to the gateway matching the recipient's address kind.

use crate::dispatcher::NotificationDispatcher;
use crate::email::EmailGateway;
use crate::notice::EmergencyNotice;
use crate::sms::SmsGateway;
use async_trait::async_trait;
use campus_core::types::{DeliveryOutcome, DispatchChannel};
use std::sync::Arc;
use tracing::debug;

/// Email for anything that looks like an address, SMS otherwise.
pub struct ChannelRouter {
    sms: Arc<SmsGateway>,
    email: Arc<EmailGateway>,
}

impl ChannelRouter {
    pub fn new(sms: Arc<SmsGateway>, email: Arc<EmailGateway>) -> Self {
        Self { sms, email }
    }

    pub fn sms(&self) -> &SmsGateway {
        &self.sms
    }

    pub fn email(&self) -> &EmailGateway {
        &self.email
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelRouter {
    async fn send(
        &self,
        channel: DispatchChannel,
        recipient: &str,
        notice: &EmergencyNotice,
    ) -> DeliveryOutcome {
        if channel == DispatchChannel::NearbyBroadcast {
            return DeliveryOutcome::permanent("nearby broadcast is delivered over the live channel");
        }

        debug!(
            alert_id = %notice.alert_id,
            channel = channel.display_name(),
            "Routing emergency notice"
        );
        if recipient.contains('@') {
            self.email
                .send(recipient, &notice.email_subject(), &notice.email_text())
        } else {
            self.sms.send(recipient, &notice.sms_text())
        }
    }
}
