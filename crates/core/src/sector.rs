//! Fixed-size grid sectors used to approximate proximity.
//!
//! The grid origin is (lat 0, lng 0). Each cell is `SECTOR_SIZE_METERS` wide;
//! longitude distances are scaled by `cos(latitude)` to compensate for meridian
//! convergence.

use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;
use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Edge length of one sector.
pub const SECTOR_SIZE_METERS: f64 = 100.0;

/// Approximate metres per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

const MIN_SECTOR_COORD: i64 = -100_000;
const MAX_SECTOR_COORD: i64 = 100_000;

/// A grid cell, identified by integer (x, y).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sector {
    x: i64,
    y: i64,
}

impl ValueObject for Sector {}

impl Sector {
    pub fn new(x: i64, y: i64) -> DomainResult<Self> {
        let range = MIN_SECTOR_COORD..=MAX_SECTOR_COORD;
        if !range.contains(&x) || !range.contains(&y) {
            return Err(DomainError::SectorOutOfRange { x, y });
        }
        Ok(Self { x, y })
    }

    /// Map a coordinate onto the grid (nearest cell).
    pub fn from_coordinate(coordinate: &Coordinate) -> DomainResult<Self> {
        let lat_meters = coordinate.latitude() * METERS_PER_DEGREE;
        let y = (lat_meters / SECTOR_SIZE_METERS).round() as i64;

        let lng_meters_per_degree = METERS_PER_DEGREE * coordinate.latitude().to_radians().cos();
        let lng_meters = coordinate.longitude() * lng_meters_per_degree;
        let x = (lng_meters / SECTOR_SIZE_METERS).round() as i64;

        Self::new(x, y)
    }

    pub fn x(&self) -> i64 {
        self.x
    }

    pub fn y(&self) -> i64 {
        self.y
    }

    /// Stable identifier, e.g. `sector_100_200`.
    pub fn id(&self) -> String {
        format!("sector_{}_{}", self.x, self.y)
    }

    /// Approximate centre of the cell (equatorial longitude scaling).
    pub fn center(&self) -> DomainResult<Coordinate> {
        let latitude = (self.y as f64 * SECTOR_SIZE_METERS) / METERS_PER_DEGREE;
        let longitude = (self.x as f64 * SECTOR_SIZE_METERS) / METERS_PER_DEGREE;
        Coordinate::new(latitude, longitude)
    }
}

impl core::fmt::Display for Sector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.id())
    }
}
