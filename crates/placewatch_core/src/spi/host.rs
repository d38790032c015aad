//! Push-based collaborators for embedding hosts.
//!
//! # Responsibility
//! - Let a host that owns the real backend push group ids, places, presence
//!   snapshots, display names and battery readings into core.
//! - Queue everything core wants written or shown until the host drains it.
//!
//! # Invariants
//! - `set_if_absent` consults pending commands first, then the latest pushed
//!   snapshot; it never queues a second `Set` for an occupied key.
//! - Drains return items in the order core produced them.

use crate::lock::{lock, read, write};
use crate::model::battery::{BatteryReading, BatteryState};
use crate::model::ids::{GroupId, UserId};
use crate::model::notification::NotificationEvent;
use crate::model::place::Place;
use crate::model::presence::{PresenceKey, PresenceRecord, PresenceSnapshot};
use crate::spi::{
    BatteryProbe, Collaborators, GroupSource, Listener, NotificationSink, PresenceStore,
    ProfileStore, SpiError, SpiResult, Subscription, SystemClock, TelemetrySink, TopicHub,
    WriteOutcome,
};
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

/// Presence write core asks the host to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceCommand {
    Set {
        key: PresenceKey,
        user_id: UserId,
        record: PresenceRecord,
    },
    Delete {
        key: PresenceKey,
        user_id: UserId,
    },
}

impl PresenceCommand {
    fn targets(&self, target: &PresenceKey, target_user: &UserId) -> bool {
        match self {
            Self::Set { key, user_id, .. } | Self::Delete { key, user_id } => {
                key == target && user_id == target_user
            }
        }
    }
}

/// Battery telemetry core asks the host to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryReport {
    pub user_id: UserId,
    pub level_percent: u8,
    pub state: BatteryState,
}

/// All collaborators in one push/drain object.
pub struct HostBridge {
    group_ids: TopicHub<UserId, Vec<GroupId>>,
    places: TopicHub<GroupId, Vec<Place>>,
    presence: TopicHub<GroupId, PresenceSnapshot>,
    display_names: RwLock<BTreeMap<UserId, String>>,
    battery: Mutex<Option<BatteryReading>>,
    presence_commands: Mutex<Vec<PresenceCommand>>,
    notifications: Mutex<Vec<NotificationEvent>>,
    battery_reports: Mutex<Vec<BatteryReport>>,
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge {
    pub fn new() -> Self {
        Self {
            group_ids: TopicHub::new("user_group_ids"),
            places: TopicHub::new("group_places"),
            presence: TopicHub::new("group_presence"),
            display_names: RwLock::new(BTreeMap::new()),
            battery: Mutex::new(None),
            presence_commands: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            battery_reports: Mutex::new(Vec::new()),
        }
    }

    /// Wires this bridge in as every collaborator, with the wall clock.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            groups: Arc::clone(self) as Arc<dyn GroupSource>,
            presence: Arc::clone(self) as Arc<dyn PresenceStore>,
            profiles: Arc::clone(self) as Arc<dyn ProfileStore>,
            notifications: Arc::clone(self) as Arc<dyn NotificationSink>,
            telemetry: Arc::clone(self) as Arc<dyn TelemetrySink>,
            battery: Arc::clone(self) as Arc<dyn BatteryProbe>,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn push_user_group_ids(&self, user_id: &UserId, group_ids: Vec<GroupId>) {
        self.group_ids.publish(user_id, group_ids);
    }

    pub fn push_user_group_ids_error(&self, user_id: &UserId, error: SpiError) {
        self.group_ids.publish_error(user_id, error);
    }

    pub fn push_group_places(&self, group_id: &GroupId, places: Vec<Place>) {
        self.places.publish(group_id, places);
    }

    pub fn push_group_places_error(&self, group_id: &GroupId, error: SpiError) {
        self.places.publish_error(group_id, error);
    }

    /// Pushes the authoritative snapshot of one group.
    ///
    /// Pending commands are kept; the host drains and applies them on its
    /// own schedule.
    pub fn push_group_presence(&self, group_id: &GroupId, snapshot: PresenceSnapshot) {
        self.presence.publish(group_id, snapshot);
    }

    pub fn push_group_presence_error(&self, group_id: &GroupId, error: SpiError) {
        self.presence.publish_error(group_id, error);
    }

    /// Sets or clears (`None`) one display name.
    pub fn push_display_name(&self, user_id: &UserId, name: Option<String>) {
        let mut names = write(&self.display_names);
        match name {
            Some(name) => {
                names.insert(user_id.clone(), name);
            }
            None => {
                names.remove(user_id);
            }
        }
    }

    pub fn push_battery(&self, reading: BatteryReading) {
        *lock(&self.battery) = Some(reading);
    }

    pub fn drain_presence_commands(&self) -> Vec<PresenceCommand> {
        std::mem::take(&mut *lock(&self.presence_commands))
    }

    pub fn drain_notifications(&self) -> Vec<NotificationEvent> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    pub fn drain_battery_reports(&self) -> Vec<BatteryReport> {
        std::mem::take(&mut *lock(&self.battery_reports))
    }

    fn occupied_in_snapshot(&self, key: &PresenceKey, user_id: &UserId) -> bool {
        self.presence
            .latest(&key.group_id)
            .is_some_and(|snapshot| snapshot.contains(&key.place_id, user_id))
    }
}

impl GroupSource for HostBridge {
    fn subscribe_user_group_ids(
        &self,
        user_id: &UserId,
        listener: Listener<Vec<GroupId>>,
    ) -> Subscription {
        self.group_ids.subscribe(user_id, listener)
    }

    fn subscribe_group_places(
        &self,
        group_id: &GroupId,
        listener: Listener<Vec<Place>>,
    ) -> Subscription {
        self.places.subscribe(group_id, listener)
    }
}

impl PresenceStore for HostBridge {
    fn set_if_absent(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> SpiResult<WriteOutcome> {
        let mut commands = lock(&self.presence_commands);
        let pending = commands
            .iter()
            .rev()
            .find(|command| command.targets(key, user_id));
        let occupied = match pending {
            Some(PresenceCommand::Set { .. }) => true,
            Some(PresenceCommand::Delete { .. }) => false,
            None => self.occupied_in_snapshot(key, user_id),
        };
        if occupied {
            debug!(
                "event=presence_set module=host status=skipped reason=already_present {}",
                key
            );
            return Ok(WriteOutcome::AlreadyPresent);
        }
        commands.push(PresenceCommand::Set {
            key: key.clone(),
            user_id: user_id.clone(),
            record,
        });
        Ok(WriteOutcome::Queued)
    }

    fn delete(&self, key: &PresenceKey, user_id: &UserId) -> SpiResult<WriteOutcome> {
        lock(&self.presence_commands).push(PresenceCommand::Delete {
            key: key.clone(),
            user_id: user_id.clone(),
        });
        Ok(WriteOutcome::Queued)
    }

    fn subscribe_group_presence(
        &self,
        group_id: &GroupId,
        listener: Listener<PresenceSnapshot>,
    ) -> Subscription {
        self.presence.subscribe(group_id, listener)
    }
}

impl ProfileStore for HostBridge {
    fn display_name(&self, user_id: &UserId) -> SpiResult<Option<String>> {
        Ok(read(&self.display_names).get(user_id).cloned())
    }
}

impl NotificationSink for HostBridge {
    fn emit(&self, event: &NotificationEvent) -> SpiResult<()> {
        lock(&self.notifications).push(event.clone());
        Ok(())
    }
}

impl TelemetrySink for HostBridge {
    fn report_battery(
        &self,
        user_id: &UserId,
        level_percent: u8,
        state: BatteryState,
    ) -> SpiResult<()> {
        lock(&self.battery_reports).push(BatteryReport {
            user_id: user_id.clone(),
            level_percent,
            state,
        });
        Ok(())
    }
}

impl BatteryProbe for HostBridge {
    fn read(&self) -> SpiResult<BatteryReading> {
        (*lock(&self.battery))
            .ok_or_else(|| SpiError::Unavailable("no battery reading pushed".to_string()))
    }
}
