//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Allocation plans, ledger operations and per-batch movements are value
/// objects: they have no identity and are compared by their attributes. They
/// are built once and handed on, never mutated in place.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
