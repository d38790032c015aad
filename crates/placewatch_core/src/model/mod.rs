//! Domain model for places, presence and location samples.
//!
//! # Responsibility
//! - Define the value types exchanged between detection, notification and
//!   host collaborators.
//! - Keep validation next to the data it guards.
//!
//! # Invariants
//! - Identifiers are validated newtypes, never raw strings.
//! - Presence is always scoped by `(group_id, place_id)`.

pub mod battery;
pub mod geo;
pub mod ids;
pub mod notification;
pub mod place;
pub mod presence;
pub mod sample;
pub mod validation;
