//! Great-circle distance and geofence membership.
//!
//! Pure functions only; no error conditions.

use crate::model::place::Place;
use crate::model::sample::LocationSample;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the Haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Checks the coordinate is finite and inside the WGS84 ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::Longitude(self.longitude));
        }
        Ok(())
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi_a = a.latitude.to_radians();
    let phi_b = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let half_chord = (delta_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (delta_lambda / 2.0).sin().powi(2);
    // Rounding can push antipodal inputs a hair past 1.0.
    let half_chord = half_chord.clamp(0.0, 1.0);
    let angle = 2.0 * half_chord.sqrt().atan2((1.0 - half_chord).sqrt());

    EARTH_RADIUS_METERS * angle
}

/// Whether the sample lies inside the place geofence (boundary inclusive).
pub fn within_radius(sample: &LocationSample, place: &Place) -> bool {
    distance_meters(sample.coordinate, place.center) <= place.radius_m
}

#[cfg(test)]
mod tests {
    use super::{distance_meters, within_radius, Coordinate, EARTH_RADIUS_METERS};
    use crate::model::ids::{GroupId, PlaceId};
    use crate::model::place::Place;
    use crate::model::sample::LocationSample;

    fn place_with_radius(center: Coordinate, radius_m: f64) -> Place {
        Place::new(
            PlaceId::parse("p1").expect("valid id"),
            GroupId::parse("g1").expect("valid id"),
            "Home",
            center,
            radius_m,
        )
    }

    #[test]
    fn zero_distance_for_identical_points() {
        let point = Coordinate::new(48.8566, 2.3522);
        assert_eq!(distance_meters(point, point), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let distance = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((distance - 111_194.9).abs() < 1.0, "got {distance}");
    }

    #[test]
    fn distance_is_symmetric() {
        let paris = Coordinate::new(48.8566, 2.3522);
        let london = Coordinate::new(51.5074, -0.1278);
        let forward = distance_meters(paris, london);
        let backward = distance_meters(london, paris);
        assert!((forward - backward).abs() < 1e-6);
        assert!((forward - 343_556.0).abs() < 1_000.0, "got {forward}");
    }

    #[test]
    fn antipodal_points_stay_finite() {
        let distance = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!(distance.is_finite());
        assert!((distance - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let center = Coordinate::new(0.0, 0.0);
        let edge = Coordinate::new(0.0, 0.001);
        let exact = distance_meters(edge, center);

        let sample = LocationSample::new(edge, 1);
        assert!(within_radius(&sample, &place_with_radius(center, exact)));
        assert!(!within_radius(&sample, &place_with_radius(center, exact - 0.01)));
    }

    #[test]
    fn validate_rejects_out_of_range_and_nan() {
        assert!(Coordinate::new(91.0, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.5).validate().is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
        assert!(Coordinate::new(-90.0, 180.0).validate().is_ok());
    }
}
