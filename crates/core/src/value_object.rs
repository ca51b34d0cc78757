//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. `Coordinate` and
/// `Sector` are the value objects of this crate: two sectors with the same grid
/// position are the same sector, whoever computed them.
///
/// To "modify" a value object, create a new one with the new values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
