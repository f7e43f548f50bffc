//! Spherical distance and planar polygon helpers.

use campus_core::types::GeoPoint;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Tolerance, in degrees, for treating a point as lying on a polygon edge.
const EDGE_EPSILON: f64 = 1e-9;

/// Great-circle distance between two points using the haversine formula.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

pub fn coordinates_in_range(point: &GeoPoint) -> bool {
    point.latitude.is_finite()
        && point.longitude.is_finite()
        && (-90.0..=90.0).contains(&point.latitude)
        && (-180.0..=180.0).contains(&point.longitude)
}

/// Even-odd ray casting with longitude as x and latitude as y. Points on an
/// edge or vertex count as inside.
pub fn point_in_polygon(point: &GeoPoint, vertices: &[GeoPoint]) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let n = vertices.len();

    for i in 0..n {
        if on_segment(point, &vertices[i], &vertices[(i + 1) % n]) {
            return true;
        }
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> bool {
    let cross = (b.longitude - a.longitude) * (p.latitude - a.latitude)
        - (b.latitude - a.latitude) * (p.longitude - a.longitude);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    let within_x = p.longitude >= a.longitude.min(b.longitude) - EDGE_EPSILON
        && p.longitude <= a.longitude.max(b.longitude) + EDGE_EPSILON;
    let within_y = p.latitude >= a.latitude.min(b.latitude) - EDGE_EPSILON
        && p.latitude <= a.latitude.max(b.latitude) + EDGE_EPSILON;
    within_x && within_y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ]
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km.
        let d = haversine_m(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
        assert_eq!(haversine_m(&GeoPoint::new(7.5, 4.5), &GeoPoint::new(7.5, 4.5)), 0.0);
    }

    #[test]
    fn test_polygon_interior_and_exterior() {
        assert!(point_in_polygon(&GeoPoint::new(0.5, 0.5), &square()));
        assert!(!point_in_polygon(&GeoPoint::new(1.5, 0.5), &square()));
        assert!(!point_in_polygon(&GeoPoint::new(-0.1, -0.1), &square()));
    }

    #[test]
    fn test_polygon_edges_and_vertices_are_inside() {
        assert!(point_in_polygon(&GeoPoint::new(0.0, 0.5), &square()));
        assert!(point_in_polygon(&GeoPoint::new(1.0, 0.25), &square()));
        assert!(point_in_polygon(&GeoPoint::new(0.5, 1.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(1.0, 1.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(0.0, 0.0), &square()));
    }

    #[test]
    fn test_degenerate_polygon() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(&GeoPoint::new(0.5, 0.5), &line));
    }

    #[test]
    fn test_coordinate_range() {
        assert!(coordinates_in_range(&GeoPoint::new(90.0, -180.0)));
        assert!(!coordinates_in_range(&GeoPoint::new(90.1, 0.0)));
        assert!(!coordinates_in_range(&GeoPoint::new(0.0, 180.5)));
        assert!(!coordinates_in_range(&GeoPoint::new(f64::NAN, 0.0)));
    }
}
