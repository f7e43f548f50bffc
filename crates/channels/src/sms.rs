//! SMS gateway: number normalisation, segment calculation and a simulated
//! provider send with a bounded in-memory outbox.
//!
//! The outbox keeps delivery receipts only: the recipient is masked and the
//! message body is not retained.

use crate::dispatcher::mask_recipient;
use campus_core::types::DeliveryOutcome;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Receipts kept per gateway; older ones are evicted first.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: Uuid,
    /// Masked destination number.
    pub to: String,
    pub sender_id: String,
    pub status: SmsStatus,
    pub created_at: DateTime<Utc>,
    pub segments: u32,
}

pub struct SmsGateway {
    sender_id: String,
    outbox: Mutex<VecDeque<SmsMessage>>,
    available: AtomicBool,
}

impl SmsGateway {
    pub fn new(sender_id: impl Into<String>) -> Self {
        let sender_id = sender_id.into();
        tracing::info!(sender_id = %sender_id, "SMS gateway initialized");
        Self {
            sender_id,
            outbox: Mutex::new(VecDeque::with_capacity(OUTBOX_CAPACITY)),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a provider outage. Sends fail transiently while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn send(&self, to: &str, body: &str) -> DeliveryOutcome {
        let Some(number) = normalize_phone_number(to) else {
            tracing::warn!(to = %mask_recipient(to), "Rejected malformed phone number");
            metrics::counter!("sms.messages_failed", "reason" => "invalid_number").increment(1);
            return DeliveryOutcome::permanent("invalid phone number");
        };

        let segments = Self::calculate_segments(body);
        let available = self.available.load(Ordering::SeqCst);
        self.record(SmsMessage {
            id: Uuid::new_v4(),
            to: mask_recipient(&number),
            sender_id: self.sender_id.clone(),
            status: if available { SmsStatus::Sent } else { SmsStatus::Failed },
            created_at: Utc::now(),
            segments,
        });

        if !available {
            tracing::error!(to = %mask_recipient(&number), "Failed to send SMS");
            metrics::counter!("sms.messages_failed", "reason" => "unavailable").increment(1);
            return DeliveryOutcome::transient("sms provider unavailable");
        }

        tracing::info!(to = %mask_recipient(&number), segments, "SMS sent");
        metrics::counter!("sms.messages_sent").increment(1);
        DeliveryOutcome::Success
    }

    /// Calculate the number of SMS segments for a message body.
    /// GSM 7-bit encoding: 160 chars per segment.
    /// Unicode (UCS-2): 70 chars per segment.
    pub fn calculate_segments(body: &str) -> u32 {
        if body.is_empty() {
            return 1;
        }

        let is_gsm = body.chars().all(is_gsm_7bit);
        let char_count = body.chars().count() as u32;

        if is_gsm {
            // GSM: 160 chars for single segment, 153 for multi-segment (UDH overhead)
            if char_count <= 160 {
                1
            } else {
                char_count.div_ceil(153)
            }
        } else if char_count <= 70 {
            1
        } else {
            char_count.div_ceil(67)
        }
    }

    fn record(&self, message: SmsMessage) {
        let mut outbox = self.outbox.lock();
        if outbox.len() >= OUTBOX_CAPACITY {
            outbox.pop_front();
        }
        outbox.push_back(message);
    }

    pub fn get_message(&self, id: Uuid) -> Option<SmsMessage> {
        self.outbox.lock().iter().find(|m| m.id == id).cloned()
    }

    /// Up to `limit` most recently created messages, newest first.
    pub fn list_messages(&self, limit: usize) -> Vec<SmsMessage> {
        self.outbox.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

/// Normalise to international format, assuming Nigerian numbers where no
/// country code is given. Returns `None` for anything that cannot be a
/// phone number.
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    let formatted = if let Some(rest) = cleaned.strip_prefix('0') {
        format!("+234{rest}")
    } else if cleaned.starts_with("234") {
        format!("+{cleaned}")
    } else if cleaned.starts_with('+') {
        cleaned
    } else {
        format!("+234{cleaned}")
    };

    let digits = &formatted[1..];
    let valid = (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then_some(formatted)
}

/// Check whether a character is in the GSM 7-bit default alphabet.
fn is_gsm_7bit(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9'
        | ' ' | '!' | '"' | '#' | '$' | '%' | '&' | '\'' | '(' | ')'
        | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '='
        | '>' | '?' | '@' | '_' | '\n' | '\r'
        | '\u{00A3}' | '\u{00A5}' | '\u{00E8}' | '\u{00E9}' | '\u{00F9}'
        | '\u{00EC}' | '\u{00F2}' | '\u{00C7}' | '\u{00D8}' | '\u{00F8}'
        | '\u{00C5}' | '\u{00E5}' | '\u{0394}' | '\u{03A6}' | '\u{0393}'
        | '\u{039B}' | '\u{03A9}' | '\u{03A0}' | '\u{03A8}' | '\u{03A3}'
        | '\u{0398}' | '\u{039E}' | '\u{00C6}' | '\u{00E6}' | '\u{00DF}'
        | '\u{00C9}' | '\u{00A4}' | '\u{00A1}' | '\u{00BF}' | '\u{00C4}'
        | '\u{00D6}' | '\u{00D1}' | '\u{00DC}' | '\u{00A7}' | '\u{00E4}'
        | '\u{00F6}' | '\u{00F1}' | '\u{00FC}' | '\u{00E0}'
        // GSM extension characters (counted as 2 but still GSM)
        | '{' | '}' | '[' | ']' | '~' | '\\' | '^' | '|' | '\u{20AC}'
    )
}
