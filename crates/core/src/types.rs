use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Opaque session token. Acts as the bearer credential for every
/// session-scoped operation, so it is never broadcast to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Public, non-reversible handle used to identify a peer on the live
    /// channel and in snapshots.
    pub fn public_alias(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight characters, used in SMS bodies.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Passenger,
    Driver,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Passenger => "passenger",
            Self::Driver => "driver",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BikeAvailability {
    High,
    Medium,
    Low,
    None,
    #[default]
    Unknown,
}

impl BikeAvailability {
    pub const ALL: [BikeAvailability; 5] = [
        Self::High,
        Self::Medium,
        Self::Low,
        Self::None,
        Self::Unknown,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
            Self::Unknown => "unknown",
        }
    }
}

/// WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Coordinates rounded to three decimal places (~110 m).
    pub fn coarsened(&self) -> Self {
        Self {
            latitude: (self.latitude * 1000.0).round() / 1000.0,
            longitude: (self.longitude * 1000.0).round() / 1000.0,
        }
    }
}

/// A position report as received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionFix {
    pub point: GeoPoint,
    pub accuracy_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceReason {
    OutOfBounds,
    InvalidCoordinates,
}

impl fmt::Display for GeofenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => f.write_str("location is outside the campus boundary"),
            Self::InvalidCoordinates => f.write_str("coordinates or accuracy are out of range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Panic,
    Medical,
    Security,
}

impl AlertType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Panic => "panic",
            Self::Medical => "medical",
            Self::Security => "security",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Triggered,
    Dispatching,
    Dispatched,
    PartiallyFailed,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Triggered => "triggered",
            Self::Dispatching => "dispatching",
            Self::Dispatched => "dispatched",
            Self::PartiallyFailed => "partially_failed",
            Self::Resolved => "resolved",
        };
        f.write_str(name)
    }
}

/// One notification destination of the emergency fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DispatchChannel {
    CampusSecurity,
    StudentUnion,
    Clinic,
    PersonalContact,
    NearbyBroadcast,
}

impl DispatchChannel {
    /// Fixed fan-out order.
    pub const ORDERED: [DispatchChannel; 5] = [
        Self::CampusSecurity,
        Self::StudentUnion,
        Self::Clinic,
        Self::PersonalContact,
        Self::NearbyBroadcast,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CampusSecurity => "campus_security",
            Self::StudentUnion => "student_union",
            Self::Clinic => "clinic",
            Self::PersonalContact => "personal_contact",
            Self::NearbyBroadcast => "nearby_broadcast",
        }
    }
}

/// Result of a single notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    TransientFailure { reason: String },
    PermanentFailure { reason: String },
}

impl DeliveryOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Terminal outcome of one channel in one dispatch round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DispatchLogEntry {
    pub channel: DispatchChannel,
    pub attempt_count: u32,
    #[schema(value_type = Object)]
    pub outcome: DeliveryOutcome,
    pub timestamp: DateTime<Utc>,
}
