//! Campus geofencing: boundary checks, zone labelling and landmark lookup.
//!
//! Everything in this crate is pure computation over an immutable
//! `CampusBoundary` and is safe to share across threads without locking.

#![warn(clippy::unwrap_used)]

pub mod boundary;
pub mod geo;
pub mod landmarks;
pub mod validator;

pub use boundary::{CampusBoundary, Landmark, Shape, Zone};
pub use landmarks::{describe_location, landmarks_by_kind, nearby_landmarks, NearbyLandmark};
pub use validator::{validate, validate_fix, GeofenceVerdict};
