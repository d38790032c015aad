//! Session-wide index of known places.
//!
//! # Responsibility
//! - Answer `place_id -> place` lookups for the UI layer.
//! - Remember place names for notifications, including places already
//!   removed from their group.
//!
//! # Invariants
//! - Active places are stored per group; a place id shared by two groups is
//!   kept in both and reported as a collision.
//! - Names survive group removal until `clear()`.

use crate::lock::{read, write};
use crate::model::ids::{GroupId, PlaceId};
use crate::model::place::{Place, PlaceInfo};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A place id already owned by another group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCollision {
    pub place_id: PlaceId,
    pub other_group_id: GroupId,
}

#[derive(Debug, Default)]
struct DirectoryState {
    active: BTreeMap<GroupId, BTreeMap<PlaceId, Place>>,
    names: BTreeMap<PlaceId, String>,
}

/// Cheaply cloneable handle; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PlaceDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl PlaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active places of `group_id` and records their names.
    ///
    /// Returns place ids also active in another group.
    pub fn replace_group(&self, group_id: &GroupId, places: &[Place]) -> Vec<PlaceCollision> {
        let mut state = write(&self.state);
        let mut collisions = Vec::new();
        for place in places {
            for (other_group_id, other_places) in &state.active {
                if other_group_id != group_id && other_places.contains_key(&place.id) {
                    collisions.push(PlaceCollision {
                        place_id: place.id.clone(),
                        other_group_id: other_group_id.clone(),
                    });
                }
            }
        }
        for place in places {
            if let Some(name) = place.display_name() {
                state.names.insert(place.id.clone(), name.to_string());
            }
        }
        let indexed = places
            .iter()
            .map(|place| (place.id.clone(), place.clone()))
            .collect();
        state.active.insert(group_id.clone(), indexed);
        collisions
    }

    /// Drops the active places of one group; names are kept.
    pub fn remove_group(&self, group_id: &GroupId) -> usize {
        write(&self.state)
            .active
            .remove(group_id)
            .map_or(0, |places| places.len())
    }

    /// Looks up an active place. With a collision the lowest group id wins.
    pub fn place_info(&self, place_id: &PlaceId) -> Option<PlaceInfo> {
        let state = read(&self.state);
        state.active.iter().find_map(|(group_id, places)| {
            places.get(place_id).map(|place| PlaceInfo {
                place: place.clone(),
                group_id: group_id.clone(),
            })
        })
    }

    /// Last non-blank name seen for `place_id` in this session.
    pub fn place_name(&self, place_id: &PlaceId) -> Option<String> {
        read(&self.state).names.get(place_id).cloned()
    }

    pub fn places_for_group(&self, group_id: &GroupId) -> Vec<Place> {
        read(&self.state)
            .active
            .get(group_id)
            .map(|places| places.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut state = write(&self.state);
        state.active.clear();
        state.names.clear();
    }

    /// Number of active `(group, place)` entries.
    pub fn len(&self) -> usize {
        read(&self.state).active.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
