//! Notification delivery for emergency alerts.
//!
//! The emergency coordinator only sees the `NotificationDispatcher` trait.
//! Production wiring routes through simulated SMS and email gateways.

pub mod dispatcher;
pub mod email;
pub mod notice;
pub mod router;
pub mod sms;
pub mod testing;

pub use dispatcher::{mask_recipient, NotificationDispatcher};
pub use email::EmailGateway;
pub use notice::EmergencyNotice;
pub use router::ChannelRouter;
pub use sms::{normalize_phone_number, SmsGateway};
pub use testing::ScriptedDispatcher;
