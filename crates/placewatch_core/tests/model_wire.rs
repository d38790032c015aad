use placewatch_core::{
    BatteryState, EngineConfig, LocationSample, Place, PresenceSnapshot, UserId,
};
use serde_json::json;

#[test]
fn sample_uses_host_field_names() {
    let sample: LocationSample = serde_json::from_value(json!({
        "latitude": 52.52,
        "longitude": 13.405,
        "timestamp": 1_700_000_000_000_i64,
        "accuracy": 12.5
    }))
    .unwrap();
    assert_eq!(sample.accuracy_m, Some(12.5));
    assert_eq!(sample.heading_deg, None);

    let value = serde_json::to_value(sample).unwrap();
    assert_eq!(value["timestamp"], json!(1_700_000_000_000_i64));
    assert!(value.get("speed").is_none());
}

#[test]
fn place_reads_radius_field() {
    let place: Place = serde_json::from_value(json!({
        "id": "p1",
        "group_id": "g1",
        "name": "Home",
        "center": { "latitude": 1.0, "longitude": 2.0 },
        "radius": 150.0
    }))
    .unwrap();
    assert_eq!(place.radius_m, 150.0);
    place.validate().unwrap();
}

#[test]
fn snapshot_matches_host_shape() {
    let snapshot: PresenceSnapshot = serde_json::from_value(json!({
        "p1": { "u1": { "arrivedAt": 10 }, "u2": { "arrivedAt": 11 } }
    }))
    .unwrap();
    assert_eq!(snapshot.len(), 2);
    let back = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(back["p1"]["u2"]["arrivedAt"], json!(11));
}

#[test]
fn reserved_characters_are_rejected_on_deserialize() {
    let parsed: Result<UserId, _> = serde_json::from_value(json!("users/u1"));
    assert!(parsed.is_err());
}

#[test]
fn battery_state_is_snake_case() {
    assert_eq!(
        serde_json::to_value(BatteryState::Unplugged).unwrap(),
        json!("unplugged")
    );
}

#[test]
fn engine_config_round_trips_defaults() {
    let json = serde_json::to_string(&EngineConfig::default()).unwrap();
    let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, EngineConfig::default());
}
