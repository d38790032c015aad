//! Per-user group fan-out.
//!
//! # Responsibility
//! - Follow the user's group list and each group's place list.
//! - Route every sample to the detection engine once per group.
//! - Keep the shared `PlaceDirectory` in step with the place lists.
//!
//! # Invariants
//! - Lock order is engine, then state. The state lock is never held while
//!   taking the engine lock.
//! - Stream errors keep cached places and only mark the stream degraded.
//! - After `teardown()` every callback and `route_sample` is a no-op.

use super::place_directory::PlaceDirectory;
use super::StreamKind;
use crate::detection::{LocationDetectionEngine, PlaceTransition, ProcessOutcome};
use crate::lock::lock;
use crate::model::ids::{GroupId, UserId};
use crate::model::place::Place;
use crate::model::presence::PresenceKey;
use crate::model::sample::LocationSample;
use crate::model::validation::ValidationError;
use crate::spi::{GroupSource, Listener, SpiError, SpiResult, Subscription};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Result of routing one sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOutcome {
    /// The registry was torn down and the sample was ignored.
    pub closed: bool,
    pub groups_routed: usize,
    /// Known groups with an empty place list.
    pub groups_skipped: usize,
    pub outcomes: Vec<ProcessOutcome>,
}

impl RouteOutcome {
    fn closed() -> Self {
        Self {
            closed: true,
            ..Self::default()
        }
    }

    pub fn transitions(&self) -> impl Iterator<Item = &PlaceTransition> {
        self.outcomes
            .iter()
            .flat_map(|outcome| outcome.transitions.iter())
    }

    pub fn failed_writes(&self) -> usize {
        self.outcomes.iter().map(ProcessOutcome::failed_writes).sum()
    }
}

struct GroupEntry {
    generation: u64,
    places: Arc<[Place]>,
    subscription: Option<Subscription>,
}

#[derive(Default)]
struct RegistryState {
    started: bool,
    closed: bool,
    next_generation: u64,
    group_ids_subscription: Option<Subscription>,
    groups: BTreeMap<GroupId, GroupEntry>,
    degraded: BTreeSet<StreamKind>,
}

struct RegistryInner {
    user_id: UserId,
    source: Arc<dyn GroupSource>,
    directory: PlaceDirectory,
    engine: Mutex<LocationDetectionEngine>,
    state: Mutex<RegistryState>,
}

/// Cloneable handle; clones share one registry.
#[derive(Clone)]
pub struct GroupFanoutRegistry {
    inner: Arc<RegistryInner>,
}

impl GroupFanoutRegistry {
    pub fn new(
        source: Arc<dyn GroupSource>,
        directory: PlaceDirectory,
        engine: LocationDetectionEngine,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                user_id: engine.user_id().clone(),
                source,
                directory,
                engine: Mutex::new(engine),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Subscribes to the user's group list. Calling it again is a no-op.
    pub fn start(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.started || state.closed {
                return;
            }
            state.started = true;
        }

        let weak = Arc::downgrade(&self.inner);
        let listener: Listener<Vec<GroupId>> = Arc::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_group_ids(result);
            }
        });
        let subscription = self
            .inner
            .source
            .subscribe_user_group_ids(&self.inner.user_id, listener);

        let rejected = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                Some(subscription)
            } else {
                state.group_ids_subscription = Some(subscription);
                None
            }
        };
        drop(rejected);
        info!("event=fanout_start module=fanout status=ok");
    }

    /// Runs `sample` through the engine once per group with places.
    pub fn route_sample(&self, sample: &LocationSample) -> RouteOutcome {
        let mut engine = lock(&self.inner.engine);
        let targets: Vec<(GroupId, Arc<[Place]>)> = {
            let state = lock(&self.inner.state);
            if state.closed {
                return RouteOutcome::closed();
            }
            state
                .groups
                .iter()
                .map(|(group_id, entry)| (group_id.clone(), Arc::clone(&entry.places)))
                .collect()
        };

        let mut route = RouteOutcome::default();
        for (group_id, places) in targets {
            if places.is_empty() {
                route.groups_skipped += 1;
                continue;
            }
            route
                .outcomes
                .push(engine.process(sample, &group_id, &places));
            route.groups_routed += 1;
        }
        debug!(
            "event=route_sample module=fanout status=ok groups_routed={} groups_skipped={} failed_writes={}",
            route.groups_routed,
            route.groups_skipped,
            route.failed_writes()
        );
        route
    }

    /// Cancels every subscription and clears all cached and detection state.
    pub fn teardown(&self) {
        let (group_ids_subscription, group_subscriptions) = {
            let mut engine = lock(&self.inner.engine);
            let taken = {
                let mut state = lock(&self.inner.state);
                if state.closed {
                    return;
                }
                state.closed = true;
                state.degraded.clear();
                let group_subscriptions: Vec<Subscription> = std::mem::take(&mut state.groups)
                    .into_values()
                    .filter_map(|entry| entry.subscription)
                    .collect();
                (state.group_ids_subscription.take(), group_subscriptions)
            };
            engine.reset();
            taken
        };
        let cancelled = group_subscriptions.len() + usize::from(group_ids_subscription.is_some());
        drop(group_ids_subscription);
        drop(group_subscriptions);
        info!(
            "event=fanout_teardown module=fanout status=ok subscriptions_cancelled={}",
            cancelled
        );
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        lock(&self.inner.state).groups.keys().cloned().collect()
    }

    /// Cached, validated place list of one group.
    pub fn places_for_group(&self, group_id: &GroupId) -> Vec<Place> {
        lock(&self.inner.state)
            .groups
            .get(group_id)
            .map(|entry| entry.places.to_vec())
            .unwrap_or_default()
    }

    pub fn degraded_streams(&self) -> Vec<StreamKind> {
        lock(&self.inner.state).degraded.iter().cloned().collect()
    }

    pub fn recent_samples(&self) -> Vec<LocationSample> {
        lock(&self.inner.engine).recent_samples()
    }

    pub fn recent_sample_count(&self) -> usize {
        lock(&self.inner.engine).recent_sample_count()
    }

    pub fn tracked_key_count(&self) -> usize {
        lock(&self.inner.engine).tracked_keys().len()
    }

    pub fn confirmed_keys(&self) -> Vec<PresenceKey> {
        lock(&self.inner.engine).confirmed_keys()
    }
}

impl RegistryInner {
    fn on_group_ids(self: &Arc<Self>, result: SpiResult<Vec<GroupId>>) {
        let wanted: BTreeSet<GroupId> = match result {
            Ok(group_ids) => group_ids.into_iter().collect(),
            Err(err) => {
                self.mark_degraded(StreamKind::UserGroupIds, &err);
                return;
            }
        };

        let (added, removed) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.degraded.remove(&StreamKind::UserGroupIds);

            let stale: Vec<GroupId> = state
                .groups
                .keys()
                .filter(|group_id| !wanted.contains(*group_id))
                .cloned()
                .collect();
            let mut removed = Vec::with_capacity(stale.len());
            for group_id in stale {
                state
                    .degraded
                    .remove(&StreamKind::GroupPlaces(group_id.clone()));
                if let Some(entry) = state.groups.remove(&group_id) {
                    removed.push((group_id, entry.subscription));
                }
            }

            let mut added = Vec::new();
            for group_id in wanted {
                if state.groups.contains_key(&group_id) {
                    continue;
                }
                state.next_generation += 1;
                let generation = state.next_generation;
                state.groups.insert(
                    group_id.clone(),
                    GroupEntry {
                        generation,
                        places: Arc::from(Vec::new()),
                        subscription: None,
                    },
                );
                added.push((group_id, generation));
            }
            (added, removed)
        };

        for (group_id, subscription) in removed {
            drop(subscription);
            let forgotten = lock(&self.engine).forget_group(&group_id);
            let places = self.directory.remove_group(&group_id);
            info!(
                "event=group_removed module=fanout status=ok group_id={} forgotten_keys={} places={}",
                group_id, forgotten, places
            );
        }

        for (group_id, generation) in added {
            self.subscribe_places(group_id, generation);
        }
    }

    fn subscribe_places(self: &Arc<Self>, group_id: GroupId, generation: u64) {
        let weak = Arc::downgrade(self);
        let listener_group_id = group_id.clone();
        let listener: Listener<Vec<Place>> = Arc::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_places(&listener_group_id, generation, result);
            }
        });
        let subscription = self.source.subscribe_group_places(&group_id, listener);

        let rejected = {
            let mut state = lock(&self.state);
            let closed = state.closed;
            match state.groups.get_mut(&group_id) {
                Some(entry) if !closed && entry.generation == generation => {
                    entry.subscription = Some(subscription);
                    None
                }
                _ => Some(subscription),
            }
        };
        let kept = rejected.is_none();
        drop(rejected);
        info!(
            "event=group_added module=fanout status={} group_id={}",
            if kept { "ok" } else { "stale" },
            group_id
        );
    }

    fn on_places(&self, group_id: &GroupId, generation: u64, result: SpiResult<Vec<Place>>) {
        let places = match result {
            Ok(places) => places,
            Err(err) => {
                self.mark_degraded(StreamKind::GroupPlaces(group_id.clone()), &err);
                return;
            }
        };
        let accepted: Arc<[Place]> = accept_places(group_id, places).into();

        let (disappeared, collisions) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let Some(entry) = state.groups.get_mut(group_id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            let disappeared: Vec<PresenceKey> = entry
                .places
                .iter()
                .filter(|old| !accepted.iter().any(|place| place.id == old.id))
                .map(|old| PresenceKey::new(group_id.clone(), old.id.clone()))
                .collect();
            entry.places = Arc::clone(&accepted);
            state
                .degraded
                .remove(&StreamKind::GroupPlaces(group_id.clone()));
            let collisions = self.directory.replace_group(group_id, &accepted);
            (disappeared, collisions)
        };

        if !disappeared.is_empty() {
            let mut engine = lock(&self.engine);
            for key in &disappeared {
                engine.forget_place(key);
            }
        }
        for collision in &collisions {
            warn!(
                "event=place_id_collision module=fanout status=warn group_id={} place_id={} other_group_id={}",
                group_id, collision.place_id, collision.other_group_id
            );
        }
        info!(
            "event=places_updated module=fanout status=ok group_id={} places={} removed={}",
            group_id,
            accepted.len(),
            disappeared.len()
        );
    }

    fn mark_degraded(&self, stream: StreamKind, err: &SpiError) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        warn!(
            "event=stream_error module=fanout status=degraded stream={} error_code={} error={}",
            stream,
            err.code(),
            err
        );
        state.degraded.insert(stream);
    }
}

/// Drops invalid, foreign or duplicate places from one group's list.
fn accept_places(group_id: &GroupId, places: Vec<Place>) -> Vec<Place> {
    let mut accepted: Vec<Place> = Vec::with_capacity(places.len());
    for place in places {
        let verdict = if &place.group_id != group_id {
            Err(ValidationError::GroupMismatch {
                expected: group_id.to_string(),
                found: place.group_id.to_string(),
            })
        } else {
            place.validate()
        };
        if let Err(err) = verdict {
            warn!(
                "event=place_rejected module=fanout status=warn group_id={} place_id={} error={}",
                group_id, place.id, err
            );
            continue;
        }
        if accepted.iter().any(|existing| existing.id == place.id) {
            warn!(
                "event=place_rejected module=fanout status=warn group_id={} place_id={} error=duplicate place id",
                group_id, place.id
            );
            continue;
        }
        accepted.push(place);
    }
    accepted
}
