//! Per-user detection engine.
//!
//! # Responsibility
//! - Evaluate each sample against one group's places.
//! - Write confirmed arrivals and departures to the presence store.
//!
//! # Invariants
//! - A failed write never aborts the remaining places of the same sample.
//! - Tracker state is never rolled back after a failed write.
//! - The recent-sample buffer never exceeds its capacity.

use super::tracker::{PresenceStateTracker, Transition};
use crate::config::DetectionConfig;
use crate::model::geo::{distance_meters, within_radius};
use crate::model::ids::{GroupId, UserId};
use crate::model::place::Place;
use crate::model::presence::{PresenceKey, PresenceRecord};
use crate::model::sample::LocationSample;
use crate::spi::{Clock, PresenceStore, SpiResult, WriteOutcome};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// One confirmed transition and the result of its store write.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceTransition {
    pub key: PresenceKey,
    pub place_name: String,
    pub transition: Transition,
    pub write: SpiResult<WriteOutcome>,
}

/// Result of processing one sample against one group.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub group_id: GroupId,
    pub places_evaluated: usize,
    pub transitions: Vec<PlaceTransition>,
}

impl ProcessOutcome {
    pub fn failed_writes(&self) -> usize {
        self.transitions
            .iter()
            .filter(|transition| transition.write.is_err())
            .count()
    }
}

pub struct LocationDetectionEngine {
    user_id: UserId,
    tracker: PresenceStateTracker,
    recent: VecDeque<LocationSample>,
    recent_capacity: usize,
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
}

impl LocationDetectionEngine {
    pub fn new(
        user_id: UserId,
        config: &DetectionConfig,
        store: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let recent_capacity = config.recent_buffer_len.max(1);
        Self {
            user_id,
            tracker: PresenceStateTracker::new(config.arrival_threshold),
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
            store,
            clock,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Feeds `sample` to the tracker for every place of `group_id`.
    pub fn process(
        &mut self,
        sample: &LocationSample,
        group_id: &GroupId,
        places: &[Place],
    ) -> ProcessOutcome {
        self.remember(sample);

        let mut transitions = Vec::new();
        for place in places {
            let key = PresenceKey::new(group_id.clone(), place.id.clone());
            let in_radius = within_radius(sample, place);
            debug!(
                "event=place_check module=detection status=ok {} in_radius={} distance_m={:.1} radius_m={:.1}",
                key,
                in_radius,
                distance_meters(sample.coordinate, place.center),
                place.radius_m
            );

            let transition = self.tracker.observe(&key, in_radius);
            let write = match transition {
                Transition::None => continue,
                Transition::Confirmed => self.store.set_if_absent(
                    &key,
                    &self.user_id,
                    PresenceRecord::arrived_at(self.clock.now_ms()),
                ),
                Transition::Lost => self.store.delete(&key, &self.user_id),
            };

            match &write {
                Ok(outcome) => info!(
                    "event=presence_transition module=detection status=ok transition={} {} write={}",
                    transition.as_str(),
                    key,
                    outcome.as_str()
                ),
                Err(err) => warn!(
                    "event=presence_transition module=detection status=error transition={} {} error_code={} error={}",
                    transition.as_str(),
                    key,
                    err.code(),
                    err
                ),
            }

            transitions.push(PlaceTransition {
                key,
                place_name: place.name.clone(),
                transition,
                write,
            });
        }

        ProcessOutcome {
            group_id: group_id.clone(),
            places_evaluated: places.len(),
            transitions,
        }
    }

    /// Oldest first.
    pub fn recent_samples(&self) -> Vec<LocationSample> {
        self.recent.iter().copied().collect()
    }

    pub fn recent_sample_count(&self) -> usize {
        self.recent.len()
    }

    /// Clears the buffer and all detection state.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.tracker.reset();
    }

    pub fn forget_place(&mut self, key: &PresenceKey) -> bool {
        self.tracker.forget(key)
    }

    pub fn forget_group(&mut self, group_id: &GroupId) -> usize {
        self.tracker.forget_group(group_id)
    }

    pub fn tracked_keys(&self) -> Vec<PresenceKey> {
        self.tracker.keys().cloned().collect()
    }

    pub fn confirmed_keys(&self) -> Vec<PresenceKey> {
        self.tracker.confirmed_keys()
    }

    pub fn tracker(&self) -> &PresenceStateTracker {
        &self.tracker
    }

    // A sample fanned out to several groups is buffered once.
    fn remember(&mut self, sample: &LocationSample) {
        if self.recent.back() == Some(sample) {
            return;
        }
        if self.recent.len() == self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(*sample);
    }
}

#[cfg(test)]
mod tests {
    use super::LocationDetectionEngine;
    use crate::config::DetectionConfig;
    use crate::detection::Transition;
    use crate::lock::lock;
    use crate::model::geo::Coordinate;
    use crate::model::ids::{GroupId, PlaceId, UserId};
    use crate::model::place::Place;
    use crate::model::presence::{PresenceKey, PresenceRecord, PresenceSnapshot};
    use crate::model::sample::LocationSample;
    use crate::spi::{
        Clock, Listener, PresenceStore, SpiError, SpiResult, Subscription, WriteOutcome,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(PresenceKey, i64),
        Delete(PresenceKey),
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        fail_place: Option<PlaceId>,
    }

    impl PresenceStore for RecordingStore {
        fn set_if_absent(
            &self,
            key: &PresenceKey,
            _user_id: &UserId,
            record: PresenceRecord,
        ) -> SpiResult<WriteOutcome> {
            if self.fail_place.as_ref() == Some(&key.place_id) {
                return Err(SpiError::Unavailable("offline".to_string()));
            }
            lock(&self.calls).push(Call::Set(key.clone(), record.arrived_at_ms));
            Ok(WriteOutcome::Created)
        }

        fn delete(&self, key: &PresenceKey, _user_id: &UserId) -> SpiResult<WriteOutcome> {
            lock(&self.calls).push(Call::Delete(key.clone()));
            Ok(WriteOutcome::Deleted)
        }

        fn subscribe_group_presence(
            &self,
            _group_id: &GroupId,
            _listener: Listener<PresenceSnapshot>,
        ) -> Subscription {
            Subscription::detached("recording")
        }
    }

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    fn group() -> GroupId {
        GroupId::parse("g1").expect("valid id")
    }

    fn place(id: &str) -> Place {
        Place::new(
            PlaceId::parse(id).expect("valid id"),
            group(),
            "Home",
            Coordinate::new(52.52, 13.405),
            100.0,
        )
    }

    fn inside(timestamp_ms: i64) -> LocationSample {
        LocationSample::new(Coordinate::new(52.52, 13.405), timestamp_ms)
    }

    fn outside(timestamp_ms: i64) -> LocationSample {
        LocationSample::new(Coordinate::new(52.60, 13.405), timestamp_ms)
    }

    fn engine(store: Arc<RecordingStore>) -> LocationDetectionEngine {
        LocationDetectionEngine::new(
            UserId::parse("u1").expect("valid id"),
            &DetectionConfig::default(),
            store,
            Arc::new(FixedClock(1_000)),
        )
    }

    #[test]
    fn third_inside_sample_writes_once() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = engine(Arc::clone(&store));
        let places = vec![place("p1")];
        for ts in 0..5 {
            engine.process(&inside(ts), &group(), &places);
        }
        assert_eq!(
            *lock(&store.calls),
            vec![Call::Set(places[0].presence_key(), 1_000)]
        );
    }

    #[test]
    fn exit_after_arrival_deletes() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = engine(Arc::clone(&store));
        let places = vec![place("p1")];
        for ts in 0..3 {
            engine.process(&inside(ts), &group(), &places);
        }
        let outcome = engine.process(&outside(3), &group(), &places);
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(outcome.transitions[0].transition, Transition::Lost);
        assert_eq!(
            lock(&store.calls).last(),
            Some(&Call::Delete(places[0].presence_key()))
        );
    }

    #[test]
    fn failed_write_does_not_block_other_places() {
        let store = Arc::new(RecordingStore {
            fail_place: Some(PlaceId::parse("p1").expect("valid id")),
            ..RecordingStore::default()
        });
        let mut engine = engine(Arc::clone(&store));
        let places = vec![place("p1"), place("p2")];
        let mut last = None;
        for ts in 0..3 {
            last = Some(engine.process(&inside(ts), &group(), &places));
        }
        let outcome = last.expect("processed");
        assert_eq!(outcome.transitions.len(), 2);
        assert_eq!(outcome.failed_writes(), 1);
        assert_eq!(lock(&store.calls).len(), 1);
        assert_eq!(engine.confirmed_keys().len(), 2);
    }

    #[test]
    fn recent_buffer_keeps_last_five() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = engine(store);
        for ts in 0..8 {
            engine.process(&inside(ts), &group(), &[]);
        }
        let timestamps: Vec<_> = engine
            .recent_samples()
            .iter()
            .map(|sample| sample.timestamp_ms)
            .collect();
        assert_eq!(timestamps, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn same_sample_across_groups_is_buffered_once() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = engine(store);
        let sample = inside(1);
        engine.process(&sample, &group(), &[place("p1")]);
        engine.process(&sample, &GroupId::parse("g2").expect("valid id"), &[]);
        assert_eq!(engine.recent_sample_count(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = engine(store);
        engine.process(&inside(1), &group(), &[place("p1")]);
        assert_eq!(engine.tracked_keys().len(), 1);
        engine.reset();
        assert!(engine.tracked_keys().is_empty());
        assert_eq!(engine.recent_sample_count(), 0);
    }
}
