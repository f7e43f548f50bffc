//! Wire shapes pushed to live subscribers.

use campus_core::types::{AlertId, AlertType, BikeAvailability, GeoPoint, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Public view of one peer's latest accepted position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceView {
    /// Stable public alias of the reporting session.
    pub peer: String,
    pub role: Role,
    pub location: GeoPoint,
    pub accuracy_meters: f64,
    pub availability: BikeAvailability,
    pub zone: Option<String>,
    pub landmark: String,
    pub reported_at: DateTime<Utc>,
}

/// Coarse-grained notice sent to peers near an emergency. Carries neither
/// the originator's identity nor their free-text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertBroadcast {
    pub alert_id: AlertId,
    pub alert_type: AlertType,
    /// Rounded to three decimals.
    pub approximate_location: GeoPoint,
    pub landmark: String,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Always the first message on a subscription.
    Snapshot(Vec<PresenceView>),
    Location(PresenceView),
    /// The peer's session ended or expired; drop its marker.
    Departure { peer: String },
    Alert(AlertBroadcast),
    Heartbeat { timestamp: DateTime<Utc> },
}

impl LiveMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Location(_) => "location",
            Self::Departure { .. } => "departure",
            Self::Alert(_) => "alert",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn heartbeat(timestamp: DateTime<Utc>) -> Self {
        Self::Heartbeat { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let msg = LiveMessage::Departure {
            peer: "abcd".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "departure");
        assert_eq!(json["payload"]["peer"], "abcd");
        assert_eq!(msg.kind(), "departure");

        let snapshot = serde_json::to_value(LiveMessage::Snapshot(vec![])).unwrap();
        assert_eq!(snapshot["kind"], "snapshot");
        assert!(snapshot["payload"].as_array().unwrap().is_empty());
    }
}
