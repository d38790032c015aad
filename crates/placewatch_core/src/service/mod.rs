//! Session services wiring detection and notification to collaborators.
//!
//! # Responsibility
//! - Fan samples out to every group of the signed-in user.
//! - Turn presence snapshot changes into notifications.
//! - Own the session lifecycle exposed to hosts.
//!
//! # Invariants
//! - No service holds a lock while subscribing to or cancelling a stream.
//! - Listeners hold weak references; late callbacks after teardown are no-ops.

use crate::model::ids::GroupId;
use std::fmt::{Display, Formatter};

pub mod diff_notifier;
pub mod fanout_registry;
pub mod ingestion;
pub mod place_directory;
pub mod runtime;
pub mod session;

/// Collaborator stream identity, used to report degraded streams.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    UserGroupIds,
    GroupPlaces(GroupId),
    GroupPresence(GroupId),
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserGroupIds => write!(f, "user_group_ids"),
            Self::GroupPlaces(group_id) => write!(f, "group_places:{group_id}"),
            Self::GroupPresence(group_id) => write!(f, "group_presence:{group_id}"),
        }
    }
}
