//! Collaborator traits consumed by core.

use crate::model::battery::{BatteryReading, BatteryState};
use crate::model::ids::{GroupId, UserId};
use crate::model::notification::NotificationEvent;
use crate::model::place::Place;
use crate::model::presence::{PresenceKey, PresenceRecord, PresenceSnapshot};
use crate::spi::{Listener, SpiResult, Subscription, WriteOutcome};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of group membership and group place lists.
pub trait GroupSource: Send + Sync {
    /// Streams the full list of group ids the user belongs to.
    fn subscribe_user_group_ids(
        &self,
        user_id: &UserId,
        listener: Listener<Vec<GroupId>>,
    ) -> Subscription;

    /// Streams the full place list of one group.
    fn subscribe_group_places(
        &self,
        group_id: &GroupId,
        listener: Listener<Vec<Place>>,
    ) -> Subscription;
}

/// Shared presence records plus per-group snapshot streams.
pub trait PresenceStore: Send + Sync {
    /// Writes `record` only when no record exists for `(key, user_id)`.
    fn set_if_absent(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> SpiResult<WriteOutcome>;

    /// Removes the record for `(key, user_id)`; a missing record is not an error.
    fn delete(&self, key: &PresenceKey, user_id: &UserId) -> SpiResult<WriteOutcome>;

    fn subscribe_group_presence(
        &self,
        group_id: &GroupId,
        listener: Listener<PresenceSnapshot>,
    ) -> Subscription;
}

pub trait ProfileStore: Send + Sync {
    fn display_name(&self, user_id: &UserId) -> SpiResult<Option<String>>;
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &NotificationEvent) -> SpiResult<()>;
}

pub trait TelemetrySink: Send + Sync {
    fn report_battery(
        &self,
        user_id: &UserId,
        level_percent: u8,
        state: BatteryState,
    ) -> SpiResult<()>;
}

pub trait BatteryProbe: Send + Sync {
    fn read(&self) -> SpiResult<BatteryReading>;
}

pub trait Clock: Send + Sync {
    /// Unix epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Every collaborator one session needs.
#[derive(Clone)]
pub struct Collaborators {
    pub groups: Arc<dyn GroupSource>,
    pub presence: Arc<dyn PresenceStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub battery: Arc<dyn BatteryProbe>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn with_presence(mut self, presence: Arc<dyn PresenceStore>) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
