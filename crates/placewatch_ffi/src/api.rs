//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose session lifecycle, sample ingestion and place lookup to Dart.
//! - Let Dart push backend data in and drain core output through the
//!   process-level `HostBridge`.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Failures are reported inside response envelopes, never thrown.
//! - One host runtime exists per process; core itself stays session scoped.

use log::warn;
use placewatch_core::spi::host::{BatteryReport, HostBridge, PresenceCommand};
use placewatch_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    BatteryReading, BatteryState, CadenceKind, Coordinate, DropReason, GroupId, IngestOutcome,
    LocationSample, NotificationEvent, Place, PlaceId, PresenceRecord, PresenceRuntime,
    PresenceSnapshot, RuntimeError, UserId,
};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

struct HostRuntime {
    bridge: Arc<HostBridge>,
    runtime: Mutex<PresenceRuntime>,
}

static HOST_RUNTIME: OnceLock<HostRuntime> = OnceLock::new();

fn host() -> &'static HostRuntime {
    HOST_RUNTIME.get_or_init(|| {
        let bridge = Arc::new(HostBridge::new());
        let runtime = PresenceRuntime::with_defaults(bridge.collaborators());
        HostRuntime {
            bridge,
            runtime: Mutex::new(runtime),
        }
    })
}

fn runtime() -> MutexGuard<'static, PresenceRuntime> {
    host()
        .runtime
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    pub ok: bool,
    /// Stable error code on failure (`invalid_id`, `not_initialized`, ...).
    pub error_code: Option<String>,
    pub message: String,
}

impl ActionResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: message.into(),
        }
    }

    fn failure(error_code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(error_code.to_string()),
            message: message.into(),
        }
    }
}

/// Session start response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub ok: bool,
    pub session_id: Option<String>,
    pub message: String,
}

/// Result of ingesting one platform sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResponse {
    pub ok: bool,
    /// `processed` or `dropped`; empty on failure.
    pub outcome: String,
    pub drop_reason: Option<String>,
    pub error_code: Option<String>,
    pub groups_routed: u32,
    pub transitions: u32,
    pub failed_writes: u32,
    pub message: String,
}

impl IngestResponse {
    fn failure(err: &RuntimeError) -> Self {
        Self {
            ok: false,
            outcome: String::new(),
            drop_reason: None,
            error_code: Some(err.code().to_string()),
            groups_routed: 0,
            transitions: 0,
            failed_writes: 0,
            message: err.to_string(),
        }
    }

    fn dropped(reason: DropReason) -> Self {
        Self {
            ok: true,
            outcome: "dropped".to_string(),
            drop_reason: Some(reason.as_str().to_string()),
            error_code: None,
            groups_routed: 0,
            transitions: 0,
            failed_writes: 0,
            message: "Sample dropped.".to_string(),
        }
    }
}

/// One platform location fix.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSampleItem {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    pub accuracy_m: Option<f64>,
}

/// Place row shared by pushes and lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceItem {
    pub place_id: String,
    pub group_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceInfoResponse {
    pub ok: bool,
    pub place: Option<PlaceItem>,
    pub error_code: Option<String>,
    pub message: String,
}

/// One `(place, user)` membership of a pushed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntryItem {
    pub place_id: String,
    pub user_id: String,
    pub arrived_at_ms: i64,
}

/// Presence write the host must apply to its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceCommandItem {
    /// `set` (create if absent) or `delete`.
    pub op: String,
    pub group_id: String,
    pub place_id: String,
    pub user_id: String,
    pub arrived_at_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationItem {
    /// `arrived` or `left`.
    pub kind: String,
    pub title: String,
    pub body: String,
    pub group_id: String,
    pub place_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryReportItem {
    pub user_id: String,
    pub level_percent: u32,
    pub state: String,
}

/// Location request the platform should configure per cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct CadenceProfileItem {
    pub kind: String,
    pub interval_ms: u64,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub active: bool,
    pub session_id: Option<String>,
    pub group_count: u32,
    pub place_count: u32,
    pub tracked_keys: u32,
    pub recent_sample_count: u32,
    pub degraded_streams: Vec<String>,
    pub notifications_emitted: u64,
    pub notifications_failed: u64,
}

/// Starts a presence session for the signed-in user.
///
/// # FFI contract
/// - Replaces any active session.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_initialize(user_id: String) -> SessionResponse {
    let user_id = match UserId::parse(&user_id) {
        Ok(user_id) => user_id,
        Err(err) => {
            return SessionResponse {
                ok: false,
                session_id: None,
                message: format!("presence_initialize failed: {err}"),
            }
        }
    };
    let session_id = runtime().initialize(user_id);
    SessionResponse {
        ok: true,
        session_id: Some(session_id.to_string()),
        message: "Session started.".to_string(),
    }
}

/// Ends the active session (sign-out). Idempotent.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_teardown() -> ActionResponse {
    runtime().teardown();
    ActionResponse::success("Session ended.")
}

/// Ingests one sample from the foreground location callback.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_ingest_foreground(
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
    accuracy_m: Option<f64>,
) -> IngestResponse {
    let sample = to_sample(latitude, longitude, timestamp_ms, accuracy_m);
    to_ingest_response(runtime().ingest_foreground(&sample))
}

/// Ingests one sample from the background location task.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_ingest_background(
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
    accuracy_m: Option<f64>,
) -> IngestResponse {
    let sample = to_sample(latitude, longitude, timestamp_ms, accuracy_m);
    to_ingest_response(runtime().ingest_background(&sample))
}

/// Ingests one delivery of the background location task.
///
/// # FFI contract
/// - Every sample is validated; only the newest one is processed.
/// - An empty batch is reported as `dropped` with reason `empty_batch`.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_ingest_background_batch(samples: Vec<LocationSampleItem>) -> IngestResponse {
    let samples: Vec<LocationSample> = samples
        .iter()
        .map(|item| to_sample(item.latitude, item.longitude, item.timestamp_ms, item.accuracy_m))
        .collect();
    to_ingest_response(runtime().ingest_background_batch(&samples))
}

/// Looks up an active place by id for the UI layer.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_place_info(place_id: String) -> PlaceInfoResponse {
    let place_id = match PlaceId::parse(&place_id) {
        Ok(place_id) => place_id,
        Err(err) => {
            return PlaceInfoResponse {
                ok: false,
                place: None,
                error_code: Some("invalid_id".to_string()),
                message: err.to_string(),
            }
        }
    };
    match runtime().place_info(&place_id) {
        Ok(info) => {
            let message = if info.is_some() {
                "Place found."
            } else {
                "Place not found."
            };
            PlaceInfoResponse {
                ok: true,
                place: info.map(|info| to_place_item(&info.place)),
                error_code: None,
                message: message.to_string(),
            }
        }
        Err(err) => PlaceInfoResponse {
            ok: false,
            place: None,
            error_code: Some(err.code().to_string()),
            message: err.to_string(),
        },
    }
}

/// Returns diagnostics for the active session.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_status() -> StatusResponse {
    match runtime().status() {
        Some(status) => StatusResponse {
            active: !status.closed,
            session_id: Some(status.session_id.to_string()),
            group_count: saturating_u32(status.group_ids.len()),
            place_count: saturating_u32(status.place_count),
            tracked_keys: saturating_u32(status.tracked_keys),
            recent_sample_count: saturating_u32(status.recent_sample_count),
            degraded_streams: status
                .degraded_streams
                .iter()
                .map(ToString::to_string)
                .collect(),
            notifications_emitted: status.notifications.emitted,
            notifications_failed: status.notifications.failed,
        },
        None => StatusResponse {
            active: false,
            session_id: None,
            group_count: 0,
            place_count: 0,
            tracked_keys: 0,
            recent_sample_count: 0,
            degraded_streams: Vec::new(),
            notifications_emitted: 0,
            notifications_failed: 0,
        },
    }
}

/// Location request settings for the foreground and background drivers.
#[flutter_rust_bridge::frb(sync)]
pub fn presence_cadence_profiles() -> Vec<CadenceProfileItem> {
    let cadence = runtime().config().cadence;
    [CadenceKind::Foreground, CadenceKind::Background]
        .into_iter()
        .map(|kind| {
            let profile = cadence.profile(kind);
            CadenceProfileItem {
                kind: kind.as_str().to_string(),
                interval_ms: profile.interval_ms,
                distance_m: profile.distance_m,
            }
        })
        .collect()
}

/// Pushes the full group-id list of one user.
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_user_group_ids(user_id: String, group_ids: Vec<String>) -> ActionResponse {
    let parsed = UserId::parse(&user_id).and_then(|user_id| {
        group_ids
            .iter()
            .map(GroupId::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(|group_ids| (user_id, group_ids))
    });
    match parsed {
        Ok((user_id, group_ids)) => {
            host().bridge.push_user_group_ids(&user_id, group_ids);
            ActionResponse::success("Group ids updated.")
        }
        Err(err) => ActionResponse::failure("invalid_id", err.to_string()),
    }
}

/// Pushes the full place list of one group.
///
/// Rows with invalid ids are rejected as a whole; invalid geometry is
/// filtered by core with a warning.
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_group_places(group_id: String, places: Vec<PlaceItem>) -> ActionResponse {
    let group_id = match GroupId::parse(&group_id) {
        Ok(group_id) => group_id,
        Err(err) => return ActionResponse::failure("invalid_id", err.to_string()),
    };
    match places.iter().map(to_place).collect::<Result<Vec<_>, _>>() {
        Ok(places) => {
            host().bridge.push_group_places(&group_id, places);
            ActionResponse::success("Places updated.")
        }
        Err(message) => ActionResponse::failure("invalid_id", message),
    }
}

/// Pushes the authoritative presence snapshot of one group.
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_group_presence(
    group_id: String,
    entries: Vec<PresenceEntryItem>,
) -> ActionResponse {
    let group_id = match GroupId::parse(&group_id) {
        Ok(group_id) => group_id,
        Err(err) => return ActionResponse::failure("invalid_id", err.to_string()),
    };
    match to_snapshot(&entries) {
        Ok(snapshot) => {
            host().bridge.push_group_presence(&group_id, snapshot);
            ActionResponse::success("Presence updated.")
        }
        Err(message) => ActionResponse::failure("invalid_id", message),
    }
}

/// Reports a backend stream failure for one group's places or presence.
///
/// `stream` is `places` or `presence`.
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_stream_error(group_id: String, stream: String, message: String) -> ActionResponse {
    let group_id = match GroupId::parse(&group_id) {
        Ok(group_id) => group_id,
        Err(err) => return ActionResponse::failure("invalid_id", err.to_string()),
    };
    let error = placewatch_core::SpiError::Unavailable(message);
    match stream.trim() {
        "places" => host().bridge.push_group_places_error(&group_id, error),
        "presence" => host().bridge.push_group_presence_error(&group_id, error),
        other => {
            return ActionResponse::failure(
                "invalid_stream",
                format!("unsupported stream `{other}`; expected places|presence"),
            )
        }
    }
    ActionResponse::success("Stream error recorded.")
}

/// Sets (or clears with `None`) one member's display name.
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_display_name(user_id: String, name: Option<String>) -> ActionResponse {
    match UserId::parse(&user_id) {
        Ok(user_id) => {
            host().bridge.push_display_name(&user_id, name);
            ActionResponse::success("Display name updated.")
        }
        Err(err) => ActionResponse::failure("invalid_id", err.to_string()),
    }
}

/// Stores the latest battery reading (`level_fraction` in `[0, 1]`, negative
/// when unknown; `state_code` is the platform code 1..=4).
#[flutter_rust_bridge::frb(sync)]
pub fn host_push_battery(level_fraction: f64, state_code: i32) -> ActionResponse {
    host().bridge.push_battery(BatteryReading::from_fraction(
        level_fraction,
        BatteryState::from_code(state_code),
    ));
    ActionResponse::success("Battery updated.")
}

/// Takes every presence write queued since the last drain.
#[flutter_rust_bridge::frb(sync)]
pub fn host_drain_presence_commands() -> Vec<PresenceCommandItem> {
    host()
        .bridge
        .drain_presence_commands()
        .into_iter()
        .map(to_command_item)
        .collect()
}

/// Takes every notification queued since the last drain.
#[flutter_rust_bridge::frb(sync)]
pub fn host_drain_notifications() -> Vec<NotificationItem> {
    host()
        .bridge
        .drain_notifications()
        .iter()
        .map(to_notification_item)
        .collect()
}

/// Takes every battery report queued since the last drain.
#[flutter_rust_bridge::frb(sync)]
pub fn host_drain_battery_reports() -> Vec<BatteryReportItem> {
    host()
        .bridge
        .drain_battery_reports()
        .into_iter()
        .map(to_battery_report_item)
        .collect()
}

fn to_sample(
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
    accuracy_m: Option<f64>,
) -> LocationSample {
    let sample = LocationSample::new(Coordinate::new(latitude, longitude), timestamp_ms);
    match accuracy_m {
        Some(accuracy_m) => sample.with_accuracy(accuracy_m),
        None => sample,
    }
}

fn to_ingest_response(result: Result<IngestOutcome, RuntimeError>) -> IngestResponse {
    match result {
        Ok(IngestOutcome::Processed(report)) => IngestResponse {
            ok: true,
            outcome: "processed".to_string(),
            drop_reason: None,
            error_code: None,
            groups_routed: saturating_u32(report.route.groups_routed),
            transitions: saturating_u32(report.route.transitions().count()),
            failed_writes: saturating_u32(report.route.failed_writes()),
            message: "Sample processed.".to_string(),
        },
        Ok(IngestOutcome::Dropped(reason)) => IngestResponse::dropped(reason),
        Err(err) => {
            warn!(
                "event=ffi_ingest module=ffi status=error error_code={}",
                err.code()
            );
            IngestResponse::failure(&err)
        }
    }
}

fn to_place(item: &PlaceItem) -> Result<Place, String> {
    let place_id = PlaceId::parse(&item.place_id).map_err(|err| err.to_string())?;
    let group_id = GroupId::parse(&item.group_id).map_err(|err| err.to_string())?;
    Ok(Place::new(
        place_id,
        group_id,
        item.name.clone(),
        Coordinate::new(item.latitude, item.longitude),
        item.radius_m,
    ))
}

fn to_place_item(place: &Place) -> PlaceItem {
    PlaceItem {
        place_id: place.id.to_string(),
        group_id: place.group_id.to_string(),
        name: place.name.clone(),
        latitude: place.center.latitude,
        longitude: place.center.longitude,
        radius_m: place.radius_m,
    }
}

fn to_snapshot(entries: &[PresenceEntryItem]) -> Result<PresenceSnapshot, String> {
    let mut snapshot = PresenceSnapshot::new();
    for entry in entries {
        let place_id = PlaceId::parse(&entry.place_id).map_err(|err| err.to_string())?;
        let user_id = UserId::parse(&entry.user_id).map_err(|err| err.to_string())?;
        snapshot.insert(
            place_id,
            user_id,
            PresenceRecord::arrived_at(entry.arrived_at_ms),
        );
    }
    Ok(snapshot)
}

fn to_command_item(command: PresenceCommand) -> PresenceCommandItem {
    match command {
        PresenceCommand::Set {
            key,
            user_id,
            record,
        } => PresenceCommandItem {
            op: "set".to_string(),
            group_id: key.group_id.to_string(),
            place_id: key.place_id.to_string(),
            user_id: user_id.to_string(),
            arrived_at_ms: Some(record.arrived_at_ms),
        },
        PresenceCommand::Delete { key, user_id } => PresenceCommandItem {
            op: "delete".to_string(),
            group_id: key.group_id.to_string(),
            place_id: key.place_id.to_string(),
            user_id: user_id.to_string(),
            arrived_at_ms: None,
        },
    }
}

fn to_notification_item(event: &NotificationEvent) -> NotificationItem {
    NotificationItem {
        kind: event.kind.as_str().to_string(),
        title: event.title(),
        body: event.body(),
        group_id: event.group_id.to_string(),
        place_id: event.place_id.to_string(),
        user_id: event.user_id.to_string(),
    }
}

fn to_battery_report_item(report: BatteryReport) -> BatteryReportItem {
    BatteryReportItem {
        user_id: report.user_id.to_string(),
        level_percent: u32::from(report.level_percent),
        state: report.state.as_str().to_string(),
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
