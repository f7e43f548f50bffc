//! Live presence: sessions, the latest verified location per session, and
//! the broadcast hub that pushes changes to connected clients.

#![warn(clippy::unwrap_used)]

pub mod hub;
pub mod messages;
pub mod registry;
pub mod service;
pub mod session;
pub mod sweeper;

pub use hub::{BroadcastHub, SnapshotSource, SubscriberId, Subscription};
pub use messages::{AlertBroadcast, LiveMessage, PresenceView};
pub use registry::{PresenceRecord, PresenceRegistry, PresenceStats, ReportAccepted, SpotAvailability};
pub use service::PresenceService;
pub use session::{Session, SessionStore};
pub use sweeper::{SweepReport, SweepTask, Sweeper};
