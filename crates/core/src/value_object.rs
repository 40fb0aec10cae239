//! Value object marker.

/// Defined entirely by its attributes: two values with equal fields are the same
/// value (an amount of money, a tax rate, a budget line).
///
/// Value objects are immutable; "changing" one means building a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
