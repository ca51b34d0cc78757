//! `geotrack-core`: geographic value objects.
//!
//! This crate contains **pure** primitives (no infrastructure concerns). They are
//! used by the business layer to build event payloads before anything is published.

pub mod coordinate;
pub mod error;
pub mod sector;
pub mod value_object;

pub use coordinate::{Coordinate, EARTH_RADIUS_KM};
pub use error::{DomainError, DomainResult};
pub use sector::{Sector, SECTOR_SIZE_METERS};
pub use value_object::ValueObject;
