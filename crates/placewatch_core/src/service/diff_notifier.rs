//! Presence snapshot diffing and notification dispatch.
//!
//! # Responsibility
//! - Follow every group's presence snapshot stream.
//! - Diff each snapshot against the cached one and emit one notification
//!   per arrival or departure.
//!
//! # Invariants
//! - The cached snapshot is replaced before names are resolved or events
//!   emitted, so a failing sink never causes duplicate events.
//! - The first snapshot of a group subscription is diffed against an empty
//!   one, unless `announce_initial` is off.
//! - Removing a group or tearing down emits nothing.
//! - Once `teardown` returns, no further event reaches the sink.

use super::place_directory::PlaceDirectory;
use super::StreamKind;
use crate::config::NotifyPolicy;
use crate::lock::lock;
use crate::model::ids::{GroupId, UserId};
use crate::model::notification::NotificationEvent;
use crate::model::presence::{PresenceChange, PresenceChangeKind, PresenceSnapshot};
use crate::spi::{
    GroupSource, Listener, NotificationSink, PresenceStore, ProfileStore, SpiError, SpiResult,
    Subscription,
};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lists every membership that appeared (first) or disappeared (second).
///
/// Places missing from `new` count as emptied, so removing an occupied place
/// yields a `Left` for each former member.
pub fn diff_snapshots(old: &PresenceSnapshot, new: &PresenceSnapshot) -> Vec<PresenceChange> {
    let before = old.occupancy();
    let after = new.occupancy();
    let arrived = after.difference(&before).map(|(place_id, user_id)| PresenceChange {
        kind: PresenceChangeKind::Arrived,
        place_id: place_id.clone(),
        user_id: user_id.clone(),
    });
    let left = before.difference(&after).map(|(place_id, user_id)| PresenceChange {
        kind: PresenceChangeKind::Left,
        place_id: place_id.clone(),
        user_id: user_id.clone(),
    });
    arrived.chain(left).collect()
}

/// Counters since session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub emitted: u64,
    pub failed: u64,
    pub suppressed_self: u64,
}

/// Collaborators the notifier reads from and writes to.
#[derive(Clone)]
pub struct NotifierDeps {
    pub groups: Arc<dyn GroupSource>,
    pub presence: Arc<dyn PresenceStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub sink: Arc<dyn NotificationSink>,
}

struct WatchedGroup {
    generation: u64,
    snapshot: Option<PresenceSnapshot>,
    subscription: Option<Subscription>,
}

#[derive(Default)]
struct NotifierState {
    started: bool,
    closed: bool,
    next_generation: u64,
    group_ids_subscription: Option<Subscription>,
    groups: BTreeMap<GroupId, WatchedGroup>,
    degraded: BTreeSet<StreamKind>,
}

struct NotifierInner {
    user_id: UserId,
    deps: NotifierDeps,
    directory: PlaceDirectory,
    policy: NotifyPolicy,
    state: Mutex<NotifierState>,
    // Serializes emission so events leave in snapshot order.
    emit_order: Mutex<()>,
    // Mirrors `state.closed`; read while `emit_order` is held.
    closing: AtomicBool,
    emitted: AtomicU64,
    failed: AtomicU64,
    suppressed_self: AtomicU64,
}

/// Cloneable handle; clones share one notifier.
#[derive(Clone)]
pub struct PresenceDiffNotifier {
    inner: Arc<NotifierInner>,
}

impl PresenceDiffNotifier {
    pub fn new(
        user_id: UserId,
        deps: NotifierDeps,
        directory: PlaceDirectory,
        policy: NotifyPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                user_id,
                deps,
                directory,
                policy,
                state: Mutex::new(NotifierState::default()),
                emit_order: Mutex::new(()),
                closing: AtomicBool::new(false),
                emitted: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                suppressed_self: AtomicU64::new(0),
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
            .deps
            .groups
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
        info!("event=notifier_start module=notifier status=ok");
    }

    /// Cancels every subscription and drops cached snapshots silently.
    ///
    /// Blocks until an in-flight dispatch has finished or given up, so must
    /// not be called from inside a `NotificationSink` or `ProfileStore`.
    pub fn teardown(&self) {
        let (group_ids_subscription, group_subscriptions) = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.closing.store(true, Ordering::SeqCst);
            state.degraded.clear();
            let group_subscriptions: Vec<Subscription> = std::mem::take(&mut state.groups)
                .into_values()
                .filter_map(|group| group.subscription)
                .collect();
            (state.group_ids_subscription.take(), group_subscriptions)
        };
        drop(group_ids_subscription);
        drop(group_subscriptions);
        drop(lock(&self.inner.emit_order));
        info!("event=notifier_teardown module=notifier status=ok");
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    pub fn watched_groups(&self) -> Vec<GroupId> {
        lock(&self.inner.state).groups.keys().cloned().collect()
    }

    /// Cached snapshot of one group, `None` before its baseline arrives.
    pub fn cached_snapshot(&self, group_id: &GroupId) -> Option<PresenceSnapshot> {
        lock(&self.inner.state)
            .groups
            .get(group_id)
            .and_then(|group| group.snapshot.clone())
    }

    pub fn degraded_streams(&self) -> Vec<StreamKind> {
        lock(&self.inner.state).degraded.iter().cloned().collect()
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            emitted: self.inner.emitted.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            suppressed_self: self.inner.suppressed_self.load(Ordering::Relaxed),
        }
    }
}

impl NotifierInner {
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
                    .remove(&StreamKind::GroupPresence(group_id.clone()));
                if let Some(group) = state.groups.remove(&group_id) {
                    removed.push((group_id, group.subscription));
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
                    WatchedGroup {
                        generation,
                        snapshot: None,
                        subscription: None,
                    },
                );
                added.push((group_id, generation));
            }
            (added, removed)
        };

        for (group_id, subscription) in removed {
            drop(subscription);
            info!(
                "event=presence_unwatch module=notifier status=ok group_id={}",
                group_id
            );
        }
        for (group_id, generation) in added {
            self.subscribe_presence(group_id, generation);
        }
    }

    fn subscribe_presence(self: &Arc<Self>, group_id: GroupId, generation: u64) {
        let weak = Arc::downgrade(self);
        let listener_group_id = group_id.clone();
        let listener: Listener<PresenceSnapshot> = Arc::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_snapshot(&listener_group_id, generation, result);
            }
        });
        let subscription = self
            .deps
            .presence
            .subscribe_group_presence(&group_id, listener);

        let rejected = {
            let mut state = lock(&self.state);
            let closed = state.closed;
            match state.groups.get_mut(&group_id) {
                Some(group) if !closed && group.generation == generation => {
                    group.subscription = Some(subscription);
                    None
                }
                _ => Some(subscription),
            }
        };
        let kept = rejected.is_none();
        drop(rejected);
        info!(
            "event=presence_watch module=notifier status={} group_id={}",
            if kept { "ok" } else { "stale" },
            group_id
        );
    }

    fn on_snapshot(&self, group_id: &GroupId, generation: u64, result: SpiResult<PresenceSnapshot>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.mark_degraded(StreamKind::GroupPresence(group_id.clone()), &err);
                return;
            }
        };

        let (changes, _emit_guard) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let Some(group) = state.groups.get_mut(group_id) else {
                return;
            };
            if group.generation != generation {
                return;
            }
            let previous = group.snapshot.replace(snapshot);
            let changes = match (&previous, &group.snapshot) {
                (Some(old), Some(new)) => diff_snapshots(old, new),
                (None, Some(new)) if self.policy.announce_initial => {
                    diff_snapshots(&PresenceSnapshot::new(), new)
                }
                _ => Vec::new(),
            };
            if previous.is_none() {
                debug!(
                    "event=presence_baseline module=notifier status=ok group_id={} announced={}",
                    group_id,
                    changes.len()
                );
            }
            state
                .degraded
                .remove(&StreamKind::GroupPresence(group_id.clone()));
            // Taken before the state lock drops so groups emit in delivery order.
            (changes, lock(&self.emit_order))
        };

        for change in changes {
            self.dispatch(group_id, change);
        }
    }

    fn dispatch(&self, group_id: &GroupId, change: PresenceChange) {
        if self.is_closing() {
            return;
        }
        if !self.policy.include_self && change.user_id == self.user_id {
            self.suppressed_self.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = NotificationEvent {
            kind: change.kind,
            member_display_name: self.member_name(&change.user_id),
            place_name: self
                .directory
                .place_name(&change.place_id)
                .unwrap_or_else(|| self.policy.place_placeholder.clone()),
            group_id: group_id.clone(),
            place_id: change.place_id,
            user_id: change.user_id,
        };

        // Name lookups may block; teardown can land meanwhile.
        if self.is_closing() {
            debug!(
                "event=notification_emit module=notifier status=skipped reason=closed group_id={}",
                event.group_id
            );
            return;
        }
        match self.deps.sink.emit(&event) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                info!(
                    "event=notification_emit module=notifier status=ok kind={} group_id={} place_id={}",
                    event.kind.as_str(),
                    event.group_id,
                    event.place_id
                );
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event=notification_emit module=notifier status=error kind={} group_id={} place_id={} error_code={} error={}",
                    event.kind.as_str(),
                    event.group_id,
                    event.place_id,
                    err.code(),
                    err
                );
            }
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn member_name(&self, user_id: &UserId) -> String {
        match self.deps.profiles.display_name(user_id) {
            Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => self.policy.member_placeholder.clone(),
            Err(err) => {
                warn!(
                    "event=profile_lookup module=notifier status=error user_id={} error_code={} error={}",
                    user_id,
                    err.code(),
                    err
                );
                self.policy.member_placeholder.clone()
            }
        }
    }

    fn mark_degraded(&self, stream: StreamKind, err: &SpiError) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        warn!(
            "event=stream_error module=notifier status=degraded stream={} error_code={} error={}",
            stream,
            err.code(),
            err
        );
        state.degraded.insert(stream);
    }
}
