//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `placewatch_core` linkage.
//! - Drive one scripted arrival through the host bridge and print what the
//!   host would receive.
//!
//! Set `PLACEWATCH_DB_PATH` to persist presence in SQLite; otherwise an
//! in-memory store is used.

use placewatch_core::spi::host::HostBridge;
use placewatch_core::{
    Coordinate, GroupId, IngestOutcome, LocationSample, Place, PlaceId, PresenceRuntime,
    SqlitePresenceStore, UserId,
};
use std::process::ExitCode;
use std::sync::Arc;

const DB_PATH_ENV: &str = "PLACEWATCH_DB_PATH";

fn main() -> ExitCode {
    println!("placewatch_core ping={}", placewatch_core::ping());
    println!("placewatch_core version={}", placewatch_core::core_version());

    match run_smoke() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("placewatch smoke run failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_smoke() -> Result<(), Box<dyn std::error::Error>> {
    let store = match std::env::var(DB_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => SqlitePresenceStore::open(path.trim())?,
        _ => SqlitePresenceStore::open_in_memory()?,
    };

    let user_id = UserId::parse("smoke-user")?;
    let group_id = GroupId::parse("smoke-group")?;
    let place_id = PlaceId::parse("smoke-home")?;
    let center = Coordinate::new(52.52, 13.405);

    let bridge = Arc::new(HostBridge::new());
    bridge.push_user_group_ids(&user_id, vec![group_id.clone()]);
    bridge.push_group_places(
        &group_id,
        vec![Place::new(
            place_id,
            group_id.clone(),
            "Home".to_string(),
            center,
            100.0,
        )],
    );
    bridge.push_display_name(&user_id, Some("Smoke".to_string()));

    let collaborators = bridge.collaborators().with_presence(Arc::new(store));
    let mut runtime = PresenceRuntime::with_defaults(collaborators);
    let session_id = runtime.initialize(user_id);
    println!("session={session_id}");

    for ts in 0..3 {
        let sample = LocationSample::new(center, ts * 10_000);
        match runtime.ingest_foreground(&sample)? {
            IngestOutcome::Processed(report) => println!(
                "sample={ts} groups_routed={} transitions={}",
                report.route.groups_routed,
                report.route.transitions().count()
            ),
            IngestOutcome::Dropped(reason) => println!("sample={ts} dropped={}", reason.as_str()),
        }
    }

    for event in bridge.drain_notifications() {
        println!("notify title=\"{}\" body=\"{}\"", event.title(), event.body());
    }
    if let Some(status) = runtime.status() {
        println!(
            "status groups={} places={} tracked_keys={} emitted={}",
            status.group_ids.len(),
            status.place_count,
            status.tracked_keys,
            status.notifications.emitted
        );
    }
    runtime.teardown();
    Ok(())
}
