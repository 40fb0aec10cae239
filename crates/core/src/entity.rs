//! Entity trait: identity that survives attribute changes.

/// Something referenced by identifier rather than by value (a mechanic, an order).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
