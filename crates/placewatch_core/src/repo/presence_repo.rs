//! SQLite-backed presence store.
//!
//! # Responsibility
//! - Persist `(group, place, user) -> arrived_at_ms` records.
//! - Stream per-group snapshots to subscribers after each effective write.
//!
//! # Invariants
//! - `set_if_absent` never overwrites an existing row.
//! - `delete` of a missing row succeeds with `WriteOutcome::Absent`.
//! - A no-op write publishes nothing.

use super::{RepoError, RepoResult};
use crate::db::{open_db, open_db_in_memory};
use crate::lock::lock;
use crate::model::ids::{GroupId, PlaceId, UserId};
use crate::model::presence::{PresenceKey, PresenceRecord, PresenceSnapshot};
use crate::spi::{Listener, PresenceStore, SpiResult, Subscription, TopicHub, WriteOutcome};
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SNAPSHOT_SQL: &str = "SELECT place_id, user_id, arrived_at_ms
FROM presence_records
WHERE group_id = ?1
ORDER BY place_id, user_id";

/// Reference `PresenceStore` over one SQLite connection.
///
/// Snapshots are published synchronously on the writing thread once the
/// connection lock is released. Detection writes from inside
/// `GroupFanoutRegistry::route_sample`, so with this store the notifier's
/// profile lookups and sink emission run before `route_sample` returns,
/// with the registry's engine lock held. Hosts that need detection latency
/// isolated from notification delivery should put a queueing store in
/// front, as `HostBridge` does.
pub struct SqlitePresenceStore {
    conn: Mutex<Connection>,
    feed: TopicHub<GroupId, PresenceSnapshot>,
}

impl SqlitePresenceStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Wraps a connection that already has migrations applied.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            feed: TopicHub::new("sqlite_presence"),
        }
    }

    /// Reads the full snapshot of one group.
    pub fn load_snapshot(&self, group_id: &GroupId) -> RepoResult<PresenceSnapshot> {
        let conn = lock(&self.conn);
        load_snapshot(&conn, group_id)
    }

    pub fn record(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
    ) -> RepoResult<Option<PresenceRecord>> {
        let conn = lock(&self.conn);
        let arrived_at_ms = conn
            .query_row(
                "SELECT arrived_at_ms FROM presence_records
                 WHERE group_id = ?1 AND place_id = ?2 AND user_id = ?3",
                params![key.group_id.as_str(), key.place_id.as_str(), user_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(arrived_at_ms.map(PresenceRecord::arrived_at))
    }

    fn try_set_if_absent(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> RepoResult<(WriteOutcome, Option<PresenceSnapshot>)> {
        let conn = lock(&self.conn);
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO presence_records (group_id, place_id, user_id, arrived_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.group_id.as_str(),
                key.place_id.as_str(),
                user_id.as_str(),
                record.arrived_at_ms
            ],
        )?;
        if inserted == 0 {
            return Ok((WriteOutcome::AlreadyPresent, None));
        }
        let snapshot = load_snapshot(&conn, &key.group_id)?;
        Ok((WriteOutcome::Created, Some(snapshot)))
    }

    fn try_delete(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
    ) -> RepoResult<(WriteOutcome, Option<PresenceSnapshot>)> {
        let conn = lock(&self.conn);
        let deleted = conn.execute(
            "DELETE FROM presence_records
             WHERE group_id = ?1 AND place_id = ?2 AND user_id = ?3",
            params![key.group_id.as_str(), key.place_id.as_str(), user_id.as_str()],
        )?;
        if deleted == 0 {
            return Ok((WriteOutcome::Absent, None));
        }
        let snapshot = load_snapshot(&conn, &key.group_id)?;
        Ok((WriteOutcome::Deleted, Some(snapshot)))
    }

    fn finish_write(
        &self,
        op: &'static str,
        key: &PresenceKey,
        result: RepoResult<(WriteOutcome, Option<PresenceSnapshot>)>,
    ) -> SpiResult<WriteOutcome> {
        match result {
            Ok((outcome, snapshot)) => {
                info!(
                    "event=presence_write module=repo status=ok op={} {} outcome={}",
                    op,
                    key,
                    outcome.as_str()
                );
                // Published after the connection lock is released.
                if let Some(snapshot) = snapshot {
                    self.feed.publish(&key.group_id, snapshot);
                }
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    "event=presence_write module=repo status=error op={} {} error={}",
                    op, key, err
                );
                Err(err.into())
            }
        }
    }
}

impl PresenceStore for SqlitePresenceStore {
    fn set_if_absent(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> SpiResult<WriteOutcome> {
        let result = self.try_set_if_absent(key, user_id, record);
        self.finish_write("set_if_absent", key, result)
    }

    fn delete(&self, key: &PresenceKey, user_id: &UserId) -> SpiResult<WriteOutcome> {
        let result = self.try_delete(key, user_id);
        self.finish_write("delete", key, result)
    }

    fn subscribe_group_presence(
        &self,
        group_id: &GroupId,
        listener: Listener<PresenceSnapshot>,
    ) -> Subscription {
        // Seed from disk so the first subscriber sees persisted state. A write
        // that published after the load wins over the older disk read.
        if self.feed.latest(group_id).is_none() {
            match self.load_snapshot(group_id) {
                Ok(snapshot) => {
                    if !self.feed.seed_if_empty(group_id, snapshot) {
                        debug!(
                            "event=presence_seed module=repo status=skipped group_id={}",
                            group_id
                        );
                    }
                }
                Err(err) => {
                    error!(
                        "event=presence_subscribe module=repo status=error group_id={} error={}",
                        group_id, err
                    );
                    listener(Err(err.into()));
                }
            }
        }
        self.feed.subscribe(group_id, listener)
    }
}

fn load_snapshot(conn: &Connection, group_id: &GroupId) -> RepoResult<PresenceSnapshot> {
    let mut stmt = conn.prepare(SNAPSHOT_SQL)?;
    let rows = stmt.query_map(params![group_id.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut snapshot = PresenceSnapshot::new();
    for row in rows {
        let (place_id, user_id, arrived_at_ms) = row?;
        let place_id = PlaceId::parse(&place_id)
            .map_err(|err| RepoError::InvalidData(format!("place_id: {err}")))?;
        let user_id = UserId::parse(&user_id)
            .map_err(|err| RepoError::InvalidData(format!("user_id: {err}")))?;
        snapshot.insert(place_id, user_id, PresenceRecord::arrived_at(arrived_at_ms));
    }
    Ok(snapshot)
}
