//! Flutter-facing bindings for placewatch core.

pub mod api;
