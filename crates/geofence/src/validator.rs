//! Point-in-campus validation.

use crate::boundary::CampusBoundary;
use crate::geo::coordinates_in_range;
use campus_core::types::{GeoPoint, GeofenceReason, PositionFix};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GeofenceVerdict {
    Accepted { zone: Option<String> },
    Rejected { reason: GeofenceReason },
}

impl GeofenceVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Validate a bare point: coordinate range, then campus containment.
pub fn validate(campus: &CampusBoundary, point: &GeoPoint) -> GeofenceVerdict {
    if !coordinates_in_range(point) {
        return GeofenceVerdict::Rejected {
            reason: GeofenceReason::InvalidCoordinates,
        };
    }
    if !campus.contains(point) {
        return GeofenceVerdict::Rejected {
            reason: GeofenceReason::OutOfBounds,
        };
    }
    GeofenceVerdict::Accepted {
        zone: campus.zone_of(point).map(|z| z.name.clone()),
    }
}

/// Validate a client fix. Accuracy must be a positive, finite radius.
pub fn validate_fix(campus: &CampusBoundary, fix: &PositionFix) -> GeofenceVerdict {
    if !fix.accuracy_meters.is_finite() || fix.accuracy_meters <= 0.0 {
        return GeofenceVerdict::Rejected {
            reason: GeofenceReason::InvalidCoordinates,
        };
    }
    validate(campus, &fix.point)
}
