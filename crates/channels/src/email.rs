//! Email gateway for institutional responders.
//!
//! Sends are simulated: a receipt with the recipient masked and without the
//! body is kept in a bounded outbox.

use crate::dispatcher::mask_recipient;
use campus_core::types::DeliveryOutcome;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receipts kept per gateway; older ones are evicted first.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: Uuid,
    /// Masked destination address.
    pub to: String,
    pub from: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

pub struct EmailGateway {
    from_email: String,
    from_name: String,
    outbox: Mutex<VecDeque<EmailMessage>>,
    available: AtomicBool,
}

impl EmailGateway {
    pub fn new(from_email: impl Into<String>, from_name: impl Into<String>) -> Self {
        let from_email = from_email.into();
        info!(from = %from_email, "Email gateway initialized");
        Self {
            from_email,
            from_name: from_name.into(),
            outbox: Mutex::new(VecDeque::with_capacity(OUTBOX_CAPACITY)),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a provider outage. Sends fail transiently while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryOutcome {
        let to = to.trim();
        if !is_plausible_address(to) {
            warn!(to = %mask_recipient(to), "Rejected malformed email address");
            metrics::counter!("email.messages_failed", "reason" => "invalid_address").increment(1);
            return DeliveryOutcome::permanent("invalid email address");
        }

        if !self.available.load(Ordering::SeqCst) {
            warn!(to = %mask_recipient(to), "Email provider unavailable");
            metrics::counter!("email.messages_failed", "reason" => "unavailable").increment(1);
            return DeliveryOutcome::transient("email provider unavailable");
        }

        let message = EmailMessage {
            id: Uuid::new_v4(),
            to: mask_recipient(to),
            from: format!("{} <{}>", self.from_name, self.from_email),
            subject: subject.to_string(),
            sent_at: Utc::now(),
        };
        debug!(id = %message.id, subject = %subject, body_len = body.len(), "Email rendered");
        let mut outbox = self.outbox.lock();
        if outbox.len() >= OUTBOX_CAPACITY {
            outbox.pop_front();
        }
        outbox.push_back(message);
        drop(outbox);

        info!(to = %mask_recipient(to), "Email sent");
        metrics::counter!("email.messages_sent").increment(1);
        DeliveryOutcome::Success
    }

    /// Retained receipts, oldest first.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox.lock().iter().cloned().collect()
    }
}

/// `local@domain.tld`, nothing more elaborate.
fn is_plausible_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !addr.contains(char::is_whitespace)
        }
        None => false,
    }
}
