//! Per-place hysteresis state machine.
//!
//! # Invariants
//! - `Confirmed` is returned at most once per continuous in-radius run.
//! - `Lost` is returned only when the key was previously confirmed.
//! - The in-radius counter saturates instead of wrapping.

use crate::model::ids::GroupId;
use crate::model::presence::PresenceKey;
use std::collections::BTreeMap;

/// Result of feeding one observation to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Confirmed,
    Lost,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Confirmed => "confirmed",
            Self::Lost => "lost",
        }
    }
}

/// Debounce state of one `(group, place)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionState {
    pub consecutive_in_radius: u32,
    pub confirmed_present: bool,
}

/// Owns the debounce state of every observed key.
#[derive(Debug)]
pub struct PresenceStateTracker {
    threshold: u32,
    states: BTreeMap<PresenceKey, DetectionState>,
}

impl PresenceStateTracker {
    /// Builds a tracker confirming after `threshold` consecutive hits.
    /// A zero threshold is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            states: BTreeMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Applies one observation and reports the resulting transition.
    pub fn observe(&mut self, key: &PresenceKey, in_radius: bool) -> Transition {
        let threshold = self.threshold;
        let state = self.states.entry(key.clone()).or_default();

        if in_radius {
            state.consecutive_in_radius = state.consecutive_in_radius.saturating_add(1);
            if state.consecutive_in_radius >= threshold && !state.confirmed_present {
                state.confirmed_present = true;
                return Transition::Confirmed;
            }
            return Transition::None;
        }

        state.consecutive_in_radius = 0;
        if state.confirmed_present {
            state.confirmed_present = false;
            return Transition::Lost;
        }
        Transition::None
    }

    pub fn state(&self, key: &PresenceKey) -> Option<DetectionState> {
        self.states.get(key).copied()
    }

    /// Drops state for one key; returns whether anything was tracked.
    pub fn forget(&mut self, key: &PresenceKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Drops every key of one group; returns the number removed.
    pub fn forget_group(&mut self, group_id: &GroupId) -> usize {
        let before = self.states.len();
        self.states.retain(|key, _| &key.group_id != group_id);
        before - self.states.len()
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Keys currently confirmed present, in key order.
    pub fn confirmed_keys(&self) -> Vec<PresenceKey> {
        self.states
            .iter()
            .filter(|(_, state)| state.confirmed_present)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &PresenceKey> {
        self.states.keys()
    }
}
