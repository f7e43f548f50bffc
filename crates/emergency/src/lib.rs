//! Emergency alert coordination: an idempotent trigger, a per-alert state
//! machine and a multi-channel fan-out with bounded retry.

#![warn(clippy::unwrap_used)]

pub mod alert;
pub mod coordinator;
pub mod dispatch;

pub use alert::{AlertAction, EmergencyAlert};
pub use coordinator::{EmergencyCoordinator, TriggerRequest};
pub use dispatch::RetryPolicy;
