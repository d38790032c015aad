//! Location-driven presence detection.
//!
//! # Responsibility
//! - Debounce raw in/out-of-radius observations into confirmed transitions.
//! - Persist confirmed transitions through the presence store.
//!
//! # Invariants
//! - Detection state is keyed by `(group_id, place_id)` only.
//! - Samples are applied in delivery order; timestamps never reorder them.

mod engine;
mod tracker;

pub use engine::{LocationDetectionEngine, PlaceTransition, ProcessOutcome};
pub use tracker::{DetectionState, PresenceStateTracker, Transition};
