//! Core presence detection and notification engine for placewatch.
//! This crate is the single source of truth for presence invariants.

pub mod config;
pub mod db;
pub mod detection;
mod lock;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod spi;

pub use config::{
    CadenceConfig, CadenceKind, CadenceProfile, ConfigError, DetectionConfig, EngineConfig,
    NotifyPolicy,
};
pub use detection::{
    DetectionState, LocationDetectionEngine, PlaceTransition, PresenceStateTracker,
    ProcessOutcome, Transition,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::battery::{BatteryReading, BatteryState};
pub use model::geo::{distance_meters, within_radius, Coordinate};
pub use model::ids::{GroupId, IdError, PlaceId, UserId};
pub use model::notification::NotificationEvent;
pub use model::place::{Place, PlaceInfo};
pub use model::presence::{
    PresenceChange, PresenceChangeKind, PresenceKey, PresenceRecord, PresenceSnapshot,
};
pub use model::sample::LocationSample;
pub use model::validation::ValidationError;
pub use repo::{RepoError, RepoResult, SqlitePresenceStore};
pub use service::diff_notifier::{diff_snapshots, PresenceDiffNotifier};
pub use service::fanout_registry::{GroupFanoutRegistry, RouteOutcome};
pub use service::ingestion::{BatteryOutcome, IngestReport, IngestionCadenceDriver};
pub use service::place_directory::PlaceDirectory;
pub use service::runtime::{DropReason, IngestOutcome, PresenceRuntime, RuntimeError};
pub use service::session::{PresenceSession, SessionId, SessionStatus};
pub use service::StreamKind;
pub use spi::{Collaborators, SpiError, SpiResult, Subscription, WriteOutcome};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
