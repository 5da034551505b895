//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. Two value
/// objects with the same attribute values are considered equal; identity does
/// not matter. `Money` is a value object; an `Account` is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
