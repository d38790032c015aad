use placewatch_core::spi::host::HostBridge;
use placewatch_core::spi::{Clock, Listener, PresenceStore, ProfileStore, Subscription};
use placewatch_core::{
    BatteryOutcome, BatteryReading, BatteryState, Coordinate, DropReason, EngineConfig, GroupId,
    IngestOutcome, LocationSample, Place, PlaceId, PresenceKey, PresenceRecord,
    PresenceRuntime, PresenceSnapshot, RuntimeError, SpiError, SpiResult, SqlitePresenceStore,
    StreamKind, Transition, UserId, WriteOutcome,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const NOW_MS: i64 = 1_700_000_000_000;
const HOME: (f64, f64) = (52.52, 13.405);
const GYM: (f64, f64) = (52.50, 13.30);

struct FixedClock;

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        NOW_MS
    }
}

/// Fails every write for one group; delegates everything else.
struct FlakyStore {
    inner: Arc<SqlitePresenceStore>,
    failing_group: GroupId,
}

impl PresenceStore for FlakyStore {
    fn set_if_absent(
        &self,
        key: &PresenceKey,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> SpiResult<WriteOutcome> {
        if key.group_id == self.failing_group {
            return Err(SpiError::Unavailable("backend offline".to_string()));
        }
        self.inner.set_if_absent(key, user_id, record)
    }

    fn delete(&self, key: &PresenceKey, user_id: &UserId) -> SpiResult<WriteOutcome> {
        if key.group_id == self.failing_group {
            return Err(SpiError::Unavailable("backend offline".to_string()));
        }
        self.inner.delete(key, user_id)
    }

    fn subscribe_group_presence(
        &self,
        group_id: &GroupId,
        listener: Listener<PresenceSnapshot>,
    ) -> Subscription {
        self.inner.subscribe_group_presence(group_id, listener)
    }
}

/// Blocks every lookup until the test releases it.
struct GatedProfiles {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl ProfileStore for GatedProfiles {
    fn display_name(&self, _user_id: &UserId) -> SpiResult<Option<String>> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        Ok(Some("Bo".to_string()))
    }
}

struct Fixture {
    bridge: Arc<HostBridge>,
    store: Arc<SqlitePresenceStore>,
    runtime: PresenceRuntime,
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let bridge = Arc::new(HostBridge::new());
    let store = Arc::new(SqlitePresenceStore::open_in_memory().unwrap());
    let collaborators = bridge
        .collaborators()
        .with_presence(store.clone())
        .with_clock(Arc::new(FixedClock));
    let runtime = PresenceRuntime::new(config, collaborators).unwrap();
    Fixture {
        bridge,
        store,
        runtime,
    }
}

fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

fn group(id: &str) -> GroupId {
    GroupId::parse(id).unwrap()
}

fn place_id(id: &str) -> PlaceId {
    PlaceId::parse(id).unwrap()
}

fn place(group_id: &str, id: &str, name: &str, center: (f64, f64)) -> Place {
    Place::new(
        place_id(id),
        group(group_id),
        name,
        Coordinate::new(center.0, center.1),
        100.0,
    )
}

fn sample_at(center: (f64, f64), timestamp_ms: i64) -> LocationSample {
    LocationSample::new(Coordinate::new(center.0, center.1), timestamp_ms)
}

fn far_away(timestamp_ms: i64) -> LocationSample {
    sample_at((HOME.0 + 0.01, HOME.1), timestamp_ms)
}

fn key(group_id: &str, id: &str) -> PresenceKey {
    PresenceKey::new(group(group_id), place_id(id))
}

fn snapshot(entries: &[(&str, &str)]) -> PresenceSnapshot {
    PresenceSnapshot::from_entries(
        entries
            .iter()
            .map(|(place, member)| (place_id(place), user(member), PresenceRecord::arrived_at(1))),
    )
}

fn processed(outcome: IngestOutcome) -> placewatch_core::IngestReport {
    match outcome {
        IngestOutcome::Processed(report) => report,
        other => panic!("expected processed sample, got {other:?}"),
    }
}

/// One user in group g1 with a single place "Home".
fn home_fixture() -> Fixture {
    let fx = fixture();
    fx.bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    fx.bridge
        .push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    fx.bridge.push_display_name(&user("u1"), Some("Ana".to_string()));
    fx
}

#[test]
fn third_consecutive_sample_confirms_arrival() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));

    let transitions: Vec<Vec<Transition>> = (0..3)
        .map(|ts| {
            let report = processed(fx.runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap());
            report.route.transitions().map(|t| t.transition).collect()
        })
        .collect();
    assert_eq!(
        transitions,
        vec![vec![], vec![], vec![Transition::Confirmed]]
    );
    assert_eq!(
        fx.store.record(&key("g1", "p1"), &user("u1")).unwrap(),
        Some(PresenceRecord::arrived_at(NOW_MS))
    );

    let notifications = fx.bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title(), "Ana arrived");
    assert_eq!(notifications[0].body(), "Ana arrived at Home");
}

#[test]
fn leaving_after_arrival_deletes_once_and_notifies() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));
    for ts in 0..3 {
        fx.runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap();
    }
    fx.bridge.drain_notifications();

    let report = processed(fx.runtime.ingest_background(&far_away(3)).unwrap());
    let lost: Vec<_> = report.route.transitions().collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].transition, Transition::Lost);
    assert_eq!(lost[0].write, Ok(WriteOutcome::Deleted));

    let again = processed(fx.runtime.ingest_background(&far_away(4)).unwrap());
    assert_eq!(again.route.transitions().count(), 0);
    assert_eq!(fx.store.record(&key("g1", "p1"), &user("u1")).unwrap(), None);

    let notifications = fx.bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].body(), "Ana left Home");
}

#[test]
fn emptied_snapshot_emits_single_departure() {
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::with_defaults(bridge.collaborators());
    bridge.push_user_group_ids(&user("u2"), vec![group("g1")]);
    bridge.push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    bridge.push_display_name(&user("u1"), Some("Ana".to_string()));
    runtime.initialize(user("u2"));

    bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u1")]));
    let announced = bridge.drain_notifications();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].title(), "Ana arrived");

    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());
    let notifications = bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, user("u1"));
    assert_eq!(notifications[0].place_id, place_id("p1"));
    assert_eq!(notifications[0].title(), "Ana left");
}

#[test]
fn same_place_id_in_two_groups_is_tracked_independently() {
    let mut fx = fixture();
    fx.bridge
        .push_user_group_ids(&user("u1"), vec![group("g1"), group("g2")]);
    fx.bridge
        .push_group_places(&group("g1"), vec![place("g1", "pX", "Home", HOME)]);
    fx.bridge
        .push_group_places(&group("g2"), vec![place("g2", "pX", "Gym", GYM)]);
    fx.runtime.initialize(user("u1"));

    for ts in 0..3 {
        fx.runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap();
    }
    assert!(fx.store.record(&key("g1", "pX"), &user("u1")).unwrap().is_some());
    assert!(fx.store.record(&key("g2", "pX"), &user("u1")).unwrap().is_none());

    let status = fx.runtime.status().unwrap();
    assert_eq!(status.tracked_keys, 2);
    assert_eq!(status.place_count, 2);
}

#[test]
fn failing_group_write_does_not_block_other_groups() {
    let bridge = Arc::new(HostBridge::new());
    let sqlite = Arc::new(SqlitePresenceStore::open_in_memory().unwrap());
    let flaky = Arc::new(FlakyStore {
        inner: sqlite.clone(),
        failing_group: group("g1"),
    });
    let collaborators = bridge.collaborators().with_presence(flaky);
    let mut runtime = PresenceRuntime::with_defaults(collaborators);
    bridge.push_user_group_ids(&user("u1"), vec![group("g1"), group("g2")]);
    bridge.push_group_places(&group("g1"), vec![place("g1", "home", "Home", HOME)]);
    bridge.push_group_places(&group("g2"), vec![place("g2", "home2", "Home", HOME)]);
    runtime.initialize(user("u1"));

    let mut last = None;
    for ts in 0..3 {
        last = Some(processed(runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap()));
    }
    let report = last.unwrap();
    assert_eq!(report.route.groups_routed, 2);
    assert_eq!(report.route.failed_writes(), 1);
    assert!(sqlite.record(&key("g2", "home2"), &user("u1")).unwrap().is_some());

    // Failed writes are not rolled back: no second confirmation is attempted.
    let next = processed(runtime.ingest_foreground(&sample_at(HOME, 3)).unwrap());
    assert_eq!(next.route.transitions().count(), 0);
}

#[test]
fn ingestion_before_initialize_is_an_error() {
    let fx = home_fixture();
    assert_eq!(
        fx.runtime.ingest_foreground(&sample_at(HOME, 0)),
        Err(RuntimeError::NotInitialized)
    );
    assert_eq!(
        fx.runtime.place_info(&place_id("p1")),
        Err(RuntimeError::NotInitialized)
    );
}

#[test]
fn invalid_sample_is_rejected() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));
    let err = fx
        .runtime
        .ingest_foreground(&sample_at((f64::NAN, 0.0), 0))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidSample(_)));
    assert_eq!(fx.runtime.status().unwrap().recent_sample_count, 0);
}

#[test]
fn teardown_drops_samples_and_silences_streams() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));
    for ts in 0..2 {
        fx.runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap();
    }
    fx.runtime.teardown();
    fx.runtime.teardown();

    assert_eq!(
        fx.runtime.ingest_foreground(&sample_at(HOME, 2)).unwrap(),
        IngestOutcome::Dropped(DropReason::SignedOut)
    );
    assert!(fx.runtime.status().is_none());
    assert_eq!(fx.runtime.place_info(&place_id("p1")).unwrap(), None);

    fx.bridge
        .push_group_presence(&group("g1"), snapshot(&[("p1", "u9")]));
    fx.bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());
    assert!(fx.bridge.drain_notifications().is_empty());
    assert!(fx.bridge.drain_presence_commands().is_empty());
}

#[test]
fn reinitialize_starts_with_fresh_detection_state() {
    let mut fx = home_fixture();
    let first = fx.runtime.initialize(user("u1"));
    for ts in 0..2 {
        fx.runtime.ingest_foreground(&sample_at(HOME, ts)).unwrap();
    }
    let second = fx.runtime.initialize(user("u1"));
    assert_ne!(first, second);

    let report = processed(fx.runtime.ingest_foreground(&sample_at(HOME, 2)).unwrap());
    assert_eq!(report.route.transitions().count(), 0);
}

#[test]
fn place_stream_error_keeps_cached_places() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));
    fx.bridge.push_group_places_error(
        &group("g1"),
        SpiError::Disconnected("socket closed".to_string()),
    );

    let status = fx.runtime.status().unwrap();
    assert_eq!(
        status.degraded_streams,
        vec![StreamKind::GroupPlaces(group("g1"))]
    );
    assert!(fx.runtime.place_info(&place_id("p1")).unwrap().is_some());
    let report = processed(fx.runtime.ingest_foreground(&sample_at(HOME, 0)).unwrap());
    assert_eq!(report.route.groups_routed, 1);

    fx.bridge
        .push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    assert!(fx.runtime.status().unwrap().degraded_streams.is_empty());
}

#[test]
fn removed_group_is_forgotten_without_notifications() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));
    fx.runtime.ingest_foreground(&sample_at(HOME, 0)).unwrap();
    assert_eq!(fx.runtime.status().unwrap().tracked_keys, 1);

    fx.bridge.push_user_group_ids(&user("u1"), vec![]);
    let status = fx.runtime.status().unwrap();
    assert!(status.group_ids.is_empty());
    assert_eq!(status.tracked_keys, 0);
    assert!(fx.runtime.place_info(&place_id("p1")).unwrap().is_none());
    assert!(fx.bridge.drain_notifications().is_empty());
}

#[test]
fn groups_without_places_are_skipped() {
    let mut fx = fixture();
    fx.bridge
        .push_user_group_ids(&user("u1"), vec![group("g1"), group("empty")]);
    fx.bridge
        .push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    fx.runtime.initialize(user("u1"));

    let report = processed(fx.runtime.ingest_foreground(&sample_at(HOME, 0)).unwrap());
    assert_eq!(report.route.groups_routed, 1);
    assert_eq!(report.route.groups_skipped, 1);
}

#[test]
fn removed_place_keeps_its_name_for_departures() {
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::with_defaults(bridge.collaborators());
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    bridge.push_group_places(&group("g1"), vec![place("g1", "p1", "Cafe", HOME)]);
    bridge.push_display_name(&user("u2"), Some("Bo".to_string()));
    runtime.initialize(user("u1"));

    bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u2")]));
    assert_eq!(bridge.drain_notifications()[0].body(), "Bo arrived at Cafe");
    bridge.push_group_places(&group("g1"), vec![]);
    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());

    let notifications = bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].body(), "Bo left Cafe");
}

#[test]
fn missing_names_fall_back_to_placeholders() {
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::with_defaults(bridge.collaborators());
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    runtime.initialize(user("u1"));

    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());
    bridge.push_group_presence(&group("g1"), snapshot(&[("ghost", "u7")]));

    let notifications = bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].body(), "Someone arrived at a place");
}

#[test]
fn own_events_can_be_suppressed() {
    let mut config = EngineConfig::default();
    config.notify.include_self = false;
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::new(config, bridge.collaborators()).unwrap();
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    runtime.initialize(user("u1"));

    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());
    bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u1"), ("p1", "u2")]));

    let notifications = bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, user("u2"));
    assert_eq!(runtime.status().unwrap().notifications.suppressed_self, 1);
}

#[test]
fn first_snapshot_announces_members_already_present() {
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::with_defaults(bridge.collaborators());
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    bridge.push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    bridge.push_display_name(&user("u2"), Some("Bo".to_string()));
    runtime.initialize(user("u1"));

    bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u2")]));
    let notifications = bridge.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].body(), "Bo arrived at Home");
}

#[test]
fn silent_baseline_can_be_configured() {
    let mut config = EngineConfig::default();
    config.notify.announce_initial = false;
    let bridge = Arc::new(HostBridge::new());
    let mut runtime = PresenceRuntime::new(config, bridge.collaborators()).unwrap();
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u2")]));
    runtime.initialize(user("u1"));
    assert!(bridge.drain_notifications().is_empty());

    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());
    assert_eq!(bridge.drain_notifications().len(), 1);
}

#[test]
fn battery_is_reported_alongside_samples() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));

    let unknown = processed(fx.runtime.ingest_foreground(&sample_at(HOME, 0)).unwrap());
    assert!(matches!(unknown.battery, BatteryOutcome::ProbeFailed(_)));

    fx.bridge
        .push_battery(BatteryReading::from_fraction(-1.0, BatteryState::Unknown));
    let skipped = processed(fx.runtime.ingest_foreground(&sample_at(HOME, 1)).unwrap());
    assert_eq!(skipped.battery, BatteryOutcome::SkippedUnknownLevel);

    fx.bridge
        .push_battery(BatteryReading::new(80, BatteryState::Charging));
    let reported = processed(fx.runtime.ingest_background(&sample_at(HOME, 2)).unwrap());
    assert_eq!(
        reported.battery,
        BatteryOutcome::Reported {
            level_percent: 80,
            state: BatteryState::Charging,
        }
    );

    let reports = fx.bridge.drain_battery_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].level_percent, 80);
    // Battery failures never block detection.
    assert_eq!(unknown.route.groups_routed, 1);
}

#[test]
fn background_batch_uses_newest_sample() {
    let mut fx = home_fixture();
    fx.runtime.initialize(user("u1"));

    let outcome = fx
        .runtime
        .ingest_background_batch(&[sample_at(HOME, 30), far_away(10), far_away(20)])
        .unwrap();
    processed(outcome);
    let recent = fx.runtime.status().unwrap();
    assert_eq!(recent.recent_sample_count, 1);
    assert_eq!(
        fx.runtime.ingest_background_batch(&[]).unwrap(),
        IngestOutcome::Dropped(DropReason::EmptyBatch)
    );
}

#[test]
fn teardown_waits_out_in_flight_notification() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let bridge = Arc::new(HostBridge::new());
    let mut collaborators = bridge.collaborators();
    collaborators.profiles = Arc::new(GatedProfiles {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let mut runtime = PresenceRuntime::with_defaults(collaborators);
    bridge.push_user_group_ids(&user("u1"), vec![group("g1")]);
    bridge.push_group_places(&group("g1"), vec![place("g1", "p1", "Home", HOME)]);
    runtime.initialize(user("u1"));
    bridge.push_group_presence(&group("g1"), PresenceSnapshot::new());

    let pusher = {
        let bridge = bridge.clone();
        thread::spawn(move || {
            bridge.push_group_presence(&group("g1"), snapshot(&[("p1", "u2")]));
        })
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = release_tx.send(());
    });

    runtime.teardown();
    let before_return = bridge.drain_notifications().len();
    pusher.join().unwrap();
    releaser.join().unwrap();

    assert!(before_return <= 1);
    assert!(
        bridge.drain_notifications().is_empty(),
        "no event may reach the sink after teardown returns"
    );
    assert!(runtime.status().is_none());
}
