//! Collaborator seams between core and its host.
//!
//! # Responsibility
//! - Define the traits core uses to reach group data, presence storage,
//!   profiles, notifications, telemetry, battery and time.
//! - Provide the subscription handle and push hub shared by every
//!   in-process collaborator.
//!
//! # Invariants
//! - Every collaborator is `Send + Sync` and held as `Arc<dyn ...>`.
//! - Listeners may be invoked on any thread, including synchronously from
//!   inside `subscribe_*`.
//! - Every `subscribe_*` returns a `Subscription` that stops delivery once
//!   cancelled or dropped.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

mod collaborators;
pub mod host;
mod subscription;
mod topic_hub;

pub use collaborators::{
    BatteryProbe, Clock, Collaborators, GroupSource, NotificationSink, PresenceStore,
    ProfileStore, SystemClock, TelemetrySink,
};
pub use subscription::Subscription;
pub use topic_hub::TopicHub;

pub type SpiResult<T> = Result<T, SpiError>;

/// Callback receiving every value (or stream error) of one subscription.
pub type Listener<T> = Arc<dyn Fn(SpiResult<T>) + Send + Sync>;

/// Collaborator failure. Cloneable so stream errors can fan out to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpiError {
    /// Backend temporarily unreachable.
    Unavailable(String),
    /// Stream closed by the backend.
    Disconnected(String),
    /// Request refused, e.g. permission denied.
    Rejected(String),
    /// Local persistence failed.
    Storage(String),
}

impl SpiError {
    /// Stable machine-readable code for logs and FFI envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Disconnected(_) => "disconnected",
            Self::Rejected(_) => "rejected",
            Self::Storage(_) => "storage",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unavailable(message)
            | Self::Disconnected(message)
            | Self::Rejected(message)
            | Self::Storage(message) => message,
        }
    }
}

impl Display for SpiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl Error for SpiError {}

/// Effect of one presence write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Record did not exist and was written.
    Created,
    /// Record already existed and was left untouched.
    AlreadyPresent,
    /// Record existed and was removed.
    Deleted,
    /// Nothing to delete.
    Absent,
    /// Handed to the host for asynchronous application.
    Queued,
}

impl WriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyPresent => "already_present",
            Self::Deleted => "deleted",
            Self::Absent => "absent",
            Self::Queued => "queued",
        }
    }
}
