//! Presence keys, records and per-group snapshots.
//!
//! # Invariants
//! - Detection state and records are always keyed by `(group_id, place_id)`.
//! - A snapshot place with no members is equivalent to an absent place.

use crate::model::ids::{GroupId, PlaceId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Hysteresis scope: one place inside one group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PresenceKey {
    pub group_id: GroupId,
    pub place_id: PlaceId,
}

impl PresenceKey {
    pub fn new(group_id: GroupId, place_id: PlaceId) -> Self {
        Self { group_id, place_id }
    }
}

impl Display for PresenceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "group_id={} place_id={}", self.group_id, self.place_id)
    }
}

/// Durable marker that a user is inside a place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Unix epoch milliseconds when presence was confirmed.
    #[serde(rename = "arrivedAt")]
    pub arrived_at_ms: i64,
}

impl PresenceRecord {
    pub fn arrived_at(arrived_at_ms: i64) -> Self {
        Self { arrived_at_ms }
    }
}

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceChangeKind {
    Arrived,
    Left,
}

impl PresenceChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arrived => "arrived",
            Self::Left => "left",
        }
    }
}

/// One `(place, user)` membership that appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PresenceChange {
    pub kind: PresenceChangeKind,
    pub place_id: PlaceId,
    pub user_id: UserId,
}

/// Full presence set of one group: place -> user -> record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceSnapshot {
    places: BTreeMap<PlaceId, BTreeMap<UserId, PresenceRecord>>,
}

impl PresenceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from flat `(place, user, record)` entries.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (PlaceId, UserId, PresenceRecord)>,
    ) -> Self {
        let mut snapshot = Self::new();
        for (place_id, user_id, record) in entries {
            snapshot.insert(place_id, user_id, record);
        }
        snapshot
    }

    /// Inserts or replaces one membership.
    pub fn insert(&mut self, place_id: PlaceId, user_id: UserId, record: PresenceRecord) {
        self.places
            .entry(place_id)
            .or_default()
            .insert(user_id, record);
    }

    /// Removes one membership, dropping the place once it is empty.
    pub fn remove(&mut self, place_id: &PlaceId, user_id: &UserId) -> Option<PresenceRecord> {
        let members = self.places.get_mut(place_id)?;
        let removed = members.remove(user_id);
        if members.is_empty() {
            self.places.remove(place_id);
        }
        removed
    }

    pub fn record(&self, place_id: &PlaceId, user_id: &UserId) -> Option<&PresenceRecord> {
        self.places.get(place_id)?.get(user_id)
    }

    pub fn contains(&self, place_id: &PlaceId, user_id: &UserId) -> bool {
        self.record(place_id, user_id).is_some()
    }

    /// Iterates users present at one place, ordered by user id.
    pub fn members(&self, place_id: &PlaceId) -> impl Iterator<Item = &UserId> + '_ {
        self.places
            .get(place_id)
            .into_iter()
            .flat_map(|members| members.keys())
    }

    /// Iterates every `(place, members)` pair, ordered by place id.
    pub fn places(&self) -> impl Iterator<Item = (&PlaceId, &BTreeMap<UserId, PresenceRecord>)> {
        self.places.iter()
    }

    /// Set of occupied `(place, user)` pairs.
    pub fn occupancy(&self) -> BTreeSet<(PlaceId, UserId)> {
        self.places
            .iter()
            .flat_map(|(place_id, members)| {
                members
                    .keys()
                    .map(move |user_id| (place_id.clone(), user_id.clone()))
            })
            .collect()
    }

    /// Number of `(place, user)` memberships.
    pub fn len(&self) -> usize {
        self.places.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
