//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic validation failures. Infrastructure
/// concerns (log backends, serialization) belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Latitude outside [-90, 90].
    #[error("latitude must be between -90 and 90 degrees, got {0}")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("longitude must be between -180 and 180 degrees, got {0}")]
    InvalidLongitude(f64),

    /// Sector grid coordinate outside the supported range.
    #[error("sector coordinate out of range: ({x}, {y})")]
    SectorOutOfRange { x: i64, y: i64 },
}
