//! User-facing presence notifications.

use crate::model::ids::{GroupId, PlaceId, UserId};
use crate::model::presence::PresenceChangeKind;
use serde::{Deserialize, Serialize};

/// Transient event handed to the notification sink; never persisted by core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: PresenceChangeKind,
    pub member_display_name: String,
    pub place_name: String,
    pub group_id: GroupId,
    pub place_id: PlaceId,
    pub user_id: UserId,
}

impl NotificationEvent {
    /// Short heading, e.g. `Ana arrived`.
    pub fn title(&self) -> String {
        match self.kind {
            PresenceChangeKind::Arrived => format!("{} arrived", self.member_display_name),
            PresenceChangeKind::Left => format!("{} left", self.member_display_name),
        }
    }

    /// Full sentence, e.g. `Ana arrived at Home` / `Ana left Home`.
    pub fn body(&self) -> String {
        match self.kind {
            PresenceChangeKind::Arrived => format!(
                "{} arrived at {}",
                self.member_display_name, self.place_name
            ),
            PresenceChangeKind::Left => {
                format!("{} left {}", self.member_display_name, self.place_name)
            }
        }
    }
}
