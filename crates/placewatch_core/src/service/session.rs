//! One signed-in user's detection and notification session.
//!
//! # Responsibility
//! - Build the engine, registry, notifier and driver for one user.
//! - Tear all of them down together.
//!
//! # Invariants
//! - Everything a session subscribes to is cancelled by `teardown()` or drop.
//! - Sessions share no state with each other.

use super::diff_notifier::{NotifierDeps, NotifierStats, PresenceDiffNotifier};
use super::fanout_registry::GroupFanoutRegistry;
use super::ingestion::IngestionCadenceDriver;
use super::place_directory::PlaceDirectory;
use super::StreamKind;
use crate::config::EngineConfig;
use crate::detection::LocationDetectionEngine;
use crate::model::ids::{GroupId, PlaceId, UserId};
use crate::model::place::{Place, PlaceInfo};
use crate::spi::Collaborators;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Random id tagging every log line of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of a session for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub closed: bool,
    pub group_ids: Vec<GroupId>,
    pub place_count: usize,
    pub tracked_keys: usize,
    pub recent_sample_count: usize,
    pub degraded_streams: Vec<StreamKind>,
    pub notifications: NotifierStats,
}

pub struct PresenceSession {
    id: SessionId,
    user_id: UserId,
    directory: PlaceDirectory,
    registry: GroupFanoutRegistry,
    notifier: PresenceDiffNotifier,
    driver: IngestionCadenceDriver,
    closed: bool,
}

impl PresenceSession {
    /// Wires and starts every service for `user_id`.
    pub fn initialize(
        user_id: UserId,
        config: &EngineConfig,
        collaborators: &Collaborators,
    ) -> Self {
        let id = SessionId::new();
        info!(
            "event=session_init module=session status=start session_id={} user_id={}",
            id, user_id
        );

        let directory = PlaceDirectory::new();
        let engine = LocationDetectionEngine::new(
            user_id.clone(),
            &config.detection,
            collaborators.presence.clone(),
            collaborators.clock.clone(),
        );
        let registry = GroupFanoutRegistry::new(
            collaborators.groups.clone(),
            directory.clone(),
            engine,
        );
        let notifier = PresenceDiffNotifier::new(
            user_id.clone(),
            NotifierDeps {
                groups: collaborators.groups.clone(),
                presence: collaborators.presence.clone(),
                profiles: collaborators.profiles.clone(),
                sink: collaborators.notifications.clone(),
            },
            directory.clone(),
            config.notify.clone(),
        );
        let driver = IngestionCadenceDriver::new(
            user_id.clone(),
            registry.clone(),
            collaborators.battery.clone(),
            collaborators.telemetry.clone(),
            config.cadence,
        );

        // Places first so names are known before the first snapshot diff.
        registry.start();
        notifier.start();

        info!(
            "event=session_init module=session status=ok session_id={} groups={} places={}",
            id,
            registry.group_ids().len(),
            directory.len()
        );
        Self {
            id,
            user_id,
            directory,
            registry,
            notifier,
            driver,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn driver(&self) -> &IngestionCadenceDriver {
        &self.driver
    }

    pub fn registry(&self) -> &GroupFanoutRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &PresenceDiffNotifier {
        &self.notifier
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops routing, cancels every subscription and clears cached places.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry.teardown();
        self.notifier.teardown();
        self.directory.clear();
        info!(
            "event=session_teardown module=session status=ok session_id={}",
            self.id
        );
    }

    pub fn place_info(&self, place_id: &PlaceId) -> Option<PlaceInfo> {
        self.directory.place_info(place_id)
    }

    pub fn places_for_group(&self, group_id: &GroupId) -> Vec<Place> {
        self.directory.places_for_group(group_id)
    }

    pub fn status(&self) -> SessionStatus {
        let mut degraded_streams = self.registry.degraded_streams();
        degraded_streams.extend(self.notifier.degraded_streams());
        degraded_streams.sort();
        degraded_streams.dedup();
        SessionStatus {
            session_id: self.id,
            user_id: self.user_id.clone(),
            closed: self.closed,
            group_ids: self.registry.group_ids(),
            place_count: self.directory.len(),
            tracked_keys: self.registry.tracked_key_count(),
            recent_sample_count: self.registry.recent_sample_count(),
            degraded_streams,
            notifications: self.notifier.stats(),
        }
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
