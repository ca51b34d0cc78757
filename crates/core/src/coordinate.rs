//! WGS84 coordinate value object and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Mean earth radius used by the Haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Tolerance used by [`Coordinate::approx_eq`] (about 1 cm at the equator).
const EQUALITY_TOLERANCE: f64 = 1e-7;

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl ValueObject for Coordinate {}

impl Coordinate {
    /// Build a coordinate, rejecting values outside the WGS84 ranges (and NaN).
    pub fn new(latitude: f64, longitude: f64) -> DomainResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::InvalidLatitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance in metres (Haversine).
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lng = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let central_angle = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * central_angle * 1000.0
    }

    /// Whether `other` lies within `radius_meters` (inclusive). Negative radii never match.
    pub fn is_within_radius(&self, other: &Coordinate, radius_meters: f64) -> bool {
        radius_meters >= 0.0 && self.distance_to(other) <= radius_meters
    }

    pub fn approx_eq(&self, other: &Coordinate) -> bool {
        (self.latitude - other.latitude).abs() < EQUALITY_TOLERANCE
            && (self.longitude - other.longitude).abs() < EQUALITY_TOLERANCE
    }
}

impl core::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(
            Coordinate::new(91.0, 0.0),
            Err(DomainError::InvalidLatitude(91.0))
        );
        assert_eq!(
            Coordinate::new(0.0, -180.5),
            Err(DomainError::InvalidLongitude(-180.5))
        );
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn distance_between_known_cities() {
        // São Paulo -> Rio de Janeiro, roughly 360 km.
        let sao_paulo = Coordinate::new(-23.5505, -46.6333).unwrap();
        let rio = Coordinate::new(-22.9068, -43.1729).unwrap();

        let d = sao_paulo.distance_to(&rio);
        assert!((355_000.0..365_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn radius_check_is_inclusive_and_rejects_negative() {
        let a = Coordinate::new(10.0, 10.0).unwrap();
        assert!(a.is_within_radius(&a, 0.0));
        assert!(!a.is_within_radius(&a, -1.0));
    }

    #[test]
    fn display_uses_six_decimals() {
        let c = Coordinate::new(1.5, -2.25).unwrap();
        assert_eq!(c.to_string(), "1.500000,-2.250000");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: distance is symmetric, non-negative and zero to itself.
        #[test]
        fn distance_is_a_symmetric_measure(
            lat1 in -90.0f64..=90.0, lng1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lng2 in -180.0f64..=180.0,
        ) {
            let a = Coordinate::new(lat1, lng1).unwrap();
            let b = Coordinate::new(lat2, lng2).unwrap();

            let ab = a.distance_to(&b);
            let ba = b.distance_to(&a);

            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(a.distance_to(&a) < 1e-6);
            // Never more than half the circumference.
            prop_assert!(ab <= core::f64::consts::PI * EARTH_RADIUS_KM * 1000.0 + 1.0);
        }
    }
}
