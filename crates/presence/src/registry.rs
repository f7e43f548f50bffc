//! Latest campus-verified location per session.
//!
//! Reports are validated against the campus boundary before they touch the
//! map. Accepted reports overwrite the previous sample and are forwarded to
//! the broadcast hub once no registry lock is held.

use crate::hub::{BroadcastHub, SnapshotSource};
use crate::messages::{LiveMessage, PresenceView};
use crate::session::SessionStore;
use campus_core::clock::Clock;
use campus_core::config::PresenceConfig;
use campus_core::error::{PresenceError, PresenceResult};
use campus_core::types::{BikeAvailability, GeoPoint, PositionFix, Role, SessionId};
use campus_geofence::geo::haversine_m;
use campus_geofence::{describe_location, validate_fix, CampusBoundary, GeofenceVerdict};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub session_id: SessionId,
    pub fix: PositionFix,
    pub availability: BikeAvailability,
    pub zone: Option<String>,
    pub landmark: String,
    pub reported_at: DateTime<Utc>,
}

/// One entry of the active-location set.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub session_id: SessionId,
    pub role: Role,
    pub sample: LocationSample,
}

impl PresenceRecord {
    pub fn view(&self) -> PresenceView {
        PresenceView {
            peer: self.session_id.public_alias(),
            role: self.role,
            location: self.sample.fix.point,
            accuracy_meters: self.sample.fix.accuracy_meters,
            availability: self.sample.availability,
            zone: self.sample.zone.clone(),
            landmark: self.sample.landmark.clone(),
            reported_at: self.sample.reported_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReportAccepted {
    pub zone: Option<String>,
    pub landmark: String,
    pub reported_at: DateTime<Utc>,
}

/// Rolled-up availability at a pickup spot.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SpotAvailability {
    pub spot_id: String,
    pub name: String,
    pub location: GeoPoint,
    pub availability: BikeAvailability,
    pub reports: usize,
    pub last_reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PresenceStats {
    pub active_sessions: usize,
    pub passengers: usize,
    pub drivers: usize,
    pub located_sessions: usize,
    pub availability: BTreeMap<String, usize>,
    pub live_subscribers: usize,
}

pub struct PresenceRegistry {
    samples: DashMap<SessionId, LocationSample>,
    sessions: Arc<SessionStore>,
    campus: Arc<CampusBoundary>,
    hub: Arc<BroadcastHub>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
}

impl PresenceRegistry {
    pub fn new(
        config: PresenceConfig,
        campus: Arc<CampusBoundary>,
        sessions: Arc<SessionStore>,
        hub: Arc<BroadcastHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            samples: DashMap::new(),
            sessions,
            campus,
            hub,
            clock,
            config,
        }
    }

    pub fn campus(&self) -> &CampusBoundary {
        &self.campus
    }

    /// Validate and store a position report, then broadcast it.
    pub fn report(
        &self,
        session_id: &SessionId,
        fix: PositionFix,
        availability: BikeAvailability,
    ) -> PresenceResult<ReportAccepted> {
        let session = self.sessions.get(session_id)?;

        let zone = match validate_fix(&self.campus, &fix) {
            GeofenceVerdict::Accepted { zone } => zone,
            GeofenceVerdict::Rejected { reason } => {
                metrics::counter!("presence.reports.rejected", "reason" => reason_label(reason))
                    .increment(1);
                debug!(peer = %session_id.public_alias(), %reason, "Location rejected");
                return Err(PresenceError::GeofenceRejected(reason));
            }
        };

        let sample = LocationSample {
            session_id: *session_id,
            fix,
            availability,
            zone: zone.clone(),
            landmark: describe_location(&self.campus, &fix.point),
            reported_at: self.clock.now(),
        };
        self.samples.insert(*session_id, sample.clone());

        // Ended between the lookup and the insert: take the sample back out.
        if let Err(e) = self.sessions.mark_verified(session_id) {
            self.samples.remove(session_id);
            return Err(e);
        }

        metrics::counter!("presence.reports.accepted").increment(1);
        let record = PresenceRecord {
            session_id: *session_id,
            role: session.role,
            sample: sample.clone(),
        };
        self.hub.publish(LiveMessage::Location(record.view()));
        self.retract_if_ended(session_id)?;

        Ok(ReportAccepted {
            zone,
            landmark: sample.landmark,
            reported_at: sample.reported_at,
        })
    }

    /// A session that ended while its location was being published may
    /// already have had its departure sent. Follow up with another so no
    /// subscriber keeps the marker.
    fn retract_if_ended(&self, session_id: &SessionId) -> PresenceResult<()> {
        if let Err(e) = self.sessions.get(session_id) {
            self.samples.remove(session_id);
            self.hub.publish(LiveMessage::Departure {
                peer: session_id.public_alias(),
            });
            return Err(e);
        }
        Ok(())
    }

    pub fn sample(&self, session_id: &SessionId) -> Option<LocationSample> {
        self.samples.get(session_id).map(|s| s.clone())
    }

    /// Drop a session's sample. Returns whether one existed.
    pub fn forget(&self, session_id: &SessionId) -> bool {
        self.samples.remove(session_id).is_some()
    }

    fn is_fresh(&self, sample: &LocationSample, now: DateTime<Utc>) -> bool {
        now - sample.reported_at < Duration::seconds(self.config.retention_secs as i64)
    }

    /// Active, non-stale samples joined with their session's current role,
    /// oldest report first.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let now = self.clock.now();
        let samples: Vec<LocationSample> = self
            .samples
            .iter()
            .filter(|s| self.is_fresh(s, now))
            .map(|s| s.value().clone())
            .collect();

        let mut records: Vec<PresenceRecord> = samples
            .into_iter()
            .filter_map(|sample| {
                let session = self.sessions.get(&sample.session_id).ok()?;
                Some(PresenceRecord {
                    session_id: sample.session_id,
                    role: session.role,
                    sample,
                })
            })
            .collect();
        records.sort_by(|a, b| {
            a.sample
                .reported_at
                .cmp(&b.sample.reported_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        records
    }

    /// Sessions whose current sample lies within `radius_m` of `point`.
    pub fn sessions_within(&self, point: &GeoPoint, radius_m: f64) -> HashSet<SessionId> {
        self.snapshot()
            .into_iter()
            .filter(|r| haversine_m(point, &r.sample.fix.point) <= radius_m)
            .map(|r| r.session_id)
            .collect()
    }

    /// Most recent report near each pickup spot within the rollup window.
    pub fn spot_availability(&self) -> Vec<SpotAvailability> {
        let now = self.clock.now();
        let window = Duration::seconds(self.config.spot_window_secs as i64);
        let recent: Vec<LocationSample> = self
            .snapshot()
            .into_iter()
            .map(|r| r.sample)
            .filter(|s| s.availability != BikeAvailability::Unknown)
            .filter(|s| now - s.reported_at <= window)
            .collect();

        self.campus
            .pickup_spots
            .iter()
            .map(|spot| {
                let near: Vec<&LocationSample> = recent
                    .iter()
                    .filter(|s| haversine_m(&spot.location, &s.fix.point) <= self.config.spot_radius_m)
                    .collect();
                let latest = near.iter().max_by_key(|s| s.reported_at);
                SpotAvailability {
                    spot_id: spot.id.clone(),
                    name: spot.name.clone(),
                    location: spot.location,
                    availability: latest.map_or(BikeAvailability::Unknown, |s| s.availability),
                    reports: near.len(),
                    last_reported_at: latest.map(|s| s.reported_at),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> PresenceStats {
        let sessions = self.sessions.active_sessions();
        let drivers = sessions.iter().filter(|s| s.role == Role::Driver).count();

        let snapshot = self.snapshot();
        let mut counts: HashMap<BikeAvailability, usize> = HashMap::new();
        for record in &snapshot {
            *counts.entry(record.sample.availability).or_default() += 1;
        }
        let availability = BikeAvailability::ALL
            .iter()
            .map(|a| (a.display_name().to_string(), counts.get(a).copied().unwrap_or(0)))
            .collect();

        PresenceStats {
            active_sessions: sessions.len(),
            passengers: sessions.len() - drivers,
            drivers,
            located_sessions: snapshot.len(),
            availability,
            live_subscribers: self.hub.subscriber_count(),
        }
    }

    /// Remove samples older than the retention window.
    pub fn purge_stale(&self) -> Vec<SessionId> {
        let now = self.clock.now();
        let mut purged = Vec::new();
        self.samples.retain(|id, s| {
            let keep = self.is_fresh(s, now);
            if !keep {
                purged.push(*id);
            }
            keep
        });
        if !purged.is_empty() {
            warn!(count = purged.len(), "Purged stale location samples");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SnapshotSource for PresenceRegistry {
    fn snapshot_views(&self) -> Vec<PresenceView> {
        self.snapshot().iter().map(PresenceRecord::view).collect()
    }
}

fn reason_label(reason: campus_core::types::GeofenceReason) -> &'static str {
    match reason {
        campus_core::types::GeofenceReason::OutOfBounds => "out_of_bounds",
        campus_core::types::GeofenceReason::InvalidCoordinates => "invalid_coordinates",
    }
}
