//! Immutable campus geometry built once from configuration.

use crate::geo::{haversine_m, point_in_polygon};
use campus_core::config::{CampusConfig, ShapeConfig};
use campus_core::error::{PresenceError, PresenceResult};
use campus_core::types::GeoPoint;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Circle { center: GeoPoint, radius_m: f64 },
    Polygon { vertices: Vec<GeoPoint> },
    Rect { south_west: GeoPoint, north_east: GeoPoint },
}

impl Shape {
    /// Closed-region containment: points on the boundary are inside.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        match self {
            Shape::Circle { center, radius_m } => haversine_m(center, point) <= *radius_m,
            Shape::Polygon { vertices } => point_in_polygon(point, vertices),
            Shape::Rect {
                south_west,
                north_east,
            } => {
                (south_west.latitude..=north_east.latitude).contains(&point.latitude)
                    && (south_west.longitude..=north_east.longitude).contains(&point.longitude)
            }
        }
    }

    fn from_config(config: &ShapeConfig) -> PresenceResult<Self> {
        let shape = match config {
            ShapeConfig::Circle { center, radius_m } => {
                if radius_m.is_nan() || *radius_m <= 0.0 {
                    return Err(PresenceError::Config(format!(
                        "circle radius must be positive, got {radius_m}"
                    )));
                }
                Shape::Circle {
                    center: *center,
                    radius_m: *radius_m,
                }
            }
            ShapeConfig::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(PresenceError::Config(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                Shape::Polygon {
                    vertices: vertices.clone(),
                }
            }
            ShapeConfig::Rect {
                south_west,
                north_east,
            } => {
                if south_west.latitude > north_east.latitude
                    || south_west.longitude > north_east.longitude
                {
                    return Err(PresenceError::Config(
                        "rect south_west must lie south-west of north_east".to_string(),
                    ));
                }
                Shape::Rect {
                    south_west: *south_west,
                    north_east: *north_east,
                }
            }
        };
        Ok(shape)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Zone {
    pub name: String,
    #[schema(value_type = Object)]
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Landmark {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub location: GeoPoint,
    pub description: String,
}

/// Process-wide campus geometry. Loaded at startup, never mutated.
#[derive(Debug, Clone)]
pub struct CampusBoundary {
    pub name: String,
    pub boundary: Shape,
    pub zones: Vec<Zone>,
    pub landmarks: Vec<Landmark>,
    pub pickup_spots: Vec<Landmark>,
}

impl CampusBoundary {
    pub fn from_config(config: &CampusConfig) -> PresenceResult<Self> {
        let boundary = Shape::from_config(&config.boundary)?;

        let zones = config
            .zones
            .iter()
            .map(|z| {
                Ok(Zone {
                    name: z.name.clone(),
                    shape: Shape::from_config(&z.shape)?,
                })
            })
            .collect::<PresenceResult<Vec<_>>>()?;

        let landmarks: Vec<Landmark> = config
            .landmarks
            .iter()
            .map(|l| Landmark {
                id: l.id.clone(),
                name: l.name.clone(),
                kind: l.kind.clone(),
                location: l.location,
                description: l.description.clone(),
            })
            .collect();

        let pickup_spots = config
            .pickup_spots
            .iter()
            .map(|id| {
                landmarks
                    .iter()
                    .find(|l| &l.id == id)
                    .cloned()
                    .ok_or_else(|| {
                        PresenceError::Config(format!("pickup spot '{id}' is not a known landmark"))
                    })
            })
            .collect::<PresenceResult<Vec<_>>>()?;

        info!(
            campus = %config.name,
            zones = zones.len(),
            landmarks = landmarks.len(),
            pickup_spots = pickup_spots.len(),
            "Campus boundary loaded"
        );

        Ok(Self {
            name: config.name.clone(),
            boundary,
            zones,
            landmarks,
            pickup_spots,
        })
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.boundary.contains(point)
    }

    /// First configured zone containing the point.
    pub fn zone_of(&self, point: &GeoPoint) -> Option<&Zone> {
        self.zones.iter().find(|z| z.shape.contains(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::config::ZoneConfig;

    #[test]
    fn test_default_campus_loads() {
        let campus = CampusBoundary::from_config(&CampusConfig::default()).unwrap();
        assert_eq!(campus.landmarks.len(), 18);
        assert_eq!(campus.pickup_spots.len(), 6);
        assert!(campus.contains(&GeoPoint::new(7.5227, 4.5198)));
    }

    #[test]
    fn test_zone_lookup_uses_first_match() {
        let campus = CampusBoundary::from_config(&CampusConfig::default()).unwrap();
        let zone = campus.zone_of(&GeoPoint::new(7.5227, 4.5198)).unwrap();
        assert_eq!(zone.name, "Academic Zone");
        // On the shared Academic/Residential edge the earlier zone wins.
        let edge = campus.zone_of(&GeoPoint::new(7.5260, 4.5180)).unwrap();
        assert_eq!(edge.name, "Academic Zone");
        assert!(campus.zone_of(&GeoPoint::new(7.5400, 4.5300)).is_none());
    }

    #[test]
    fn test_rejects_unknown_pickup_spot() {
        let config = CampusConfig {
            pickup_spots: vec!["nowhere".to_string()],
            ..CampusConfig::default()
        };
        assert!(matches!(
            CampusBoundary::from_config(&config),
            Err(PresenceError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_degenerate_shapes() {
        let config = CampusConfig {
            boundary: ShapeConfig::Polygon {
                vertices: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)],
            },
            ..CampusConfig::default()
        };
        assert!(CampusBoundary::from_config(&config).is_err());

        let config = CampusConfig {
            zones: vec![ZoneConfig {
                name: "Nothing".to_string(),
                shape: ShapeConfig::Circle {
                    center: GeoPoint::new(7.5, 4.5),
                    radius_m: 0.0,
                },
            }],
            ..CampusConfig::default()
        };
        assert!(CampusBoundary::from_config(&config).is_err());
    }
}
