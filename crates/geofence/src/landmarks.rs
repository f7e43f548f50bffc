//! Human-readable placement relative to named landmarks.

use crate::boundary::{CampusBoundary, Landmark};
use crate::geo::haversine_m;
use campus_core::types::GeoPoint;
use serde::Serialize;
use utoipa::ToSchema;

/// Landmarks further than this are never used to describe a point.
pub const DESCRIBE_MAX_DISTANCE_M: f64 = 1000.0;

pub const UNKNOWN_LOCATION: &str = "On Campus (Location Unknown)";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NearbyLandmark {
    #[serde(flatten)]
    pub landmark: Landmark,
    pub distance_m: f64,
}

/// "At X" under 50 m, "Near X" under 200 m, otherwise "Close to X (Nm)".
pub fn describe_location(campus: &CampusBoundary, point: &GeoPoint) -> String {
    let nearest = campus
        .landmarks
        .iter()
        .map(|l| (l, haversine_m(point, &l.location)))
        .filter(|(_, d)| *d <= DESCRIBE_MAX_DISTANCE_M)
        .min_by(|a, b| a.1.total_cmp(&b.1));

    match nearest {
        Some((landmark, distance)) => {
            let meters = distance.round();
            if meters < 50.0 {
                format!("At {}", landmark.name)
            } else if meters < 200.0 {
                format!("Near {}", landmark.name)
            } else {
                format!("Close to {} ({}m)", landmark.name, meters as u64)
            }
        }
        None => UNKNOWN_LOCATION.to_string(),
    }
}

/// Landmarks within `radius_m`, closest first, distances rounded to metres.
pub fn nearby_landmarks(campus: &CampusBoundary, point: &GeoPoint, radius_m: f64) -> Vec<NearbyLandmark> {
    let mut nearby: Vec<NearbyLandmark> = campus
        .landmarks
        .iter()
        .filter_map(|l| {
            let distance = haversine_m(point, &l.location);
            (distance <= radius_m).then(|| NearbyLandmark {
                landmark: l.clone(),
                distance_m: distance.round(),
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    nearby
}

pub fn landmarks_by_kind<'a>(campus: &'a CampusBoundary, kind: &str) -> Vec<&'a Landmark> {
    campus.landmarks.iter().filter(|l| l.kind == kind).collect()
}
