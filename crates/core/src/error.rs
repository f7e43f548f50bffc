use crate::types::{AlertId, AlertStatus, GeofenceReason};
use thiserror::Error;

pub type PresenceResult<T> = Result<T, PresenceError>;

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Session is absent, expired or ended")]
    SessionInvalid,

    #[error("Location rejected: {0}")]
    GeofenceRejected(GeofenceReason),

    #[error("Alert not found: {0}")]
    AlertNotFound(AlertId),

    #[error("Cannot {action} an alert in state {from}")]
    InvalidTransition {
        from: AlertStatus,
        action: &'static str,
    },

    #[error("Contact sealing error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
