//! Group-owned places observed by core.
//!
//! # Invariants
//! - Places are read-only snapshots; core never edits them.
//! - `Place::validate()` guards every place before it reaches detection.

use crate::model::geo::Coordinate;
use crate::model::ids::{GroupId, PlaceId};
use crate::model::presence::PresenceKey;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};

/// Geofenced place defined by a group member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub group_id: GroupId,
    pub name: String,
    pub center: Coordinate,
    #[serde(rename = "radius")]
    pub radius_m: f64,
}

impl Place {
    pub fn new(
        id: PlaceId,
        group_id: GroupId,
        name: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
    ) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            center,
            radius_m,
        }
    }

    /// Validates center and radius. Names are free text and may be blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.center.validate()?;
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(ValidationError::Radius(self.radius_m));
        }
        Ok(())
    }

    /// Hysteresis scope of this place within its owning group.
    pub fn presence_key(&self) -> PresenceKey {
        PresenceKey::new(self.group_id.clone(), self.id.clone())
    }

    /// Trimmed name, or `None` when blank.
    pub fn display_name(&self) -> Option<&str> {
        let trimmed = self.name.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Place plus owning group, returned to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInfo {
    pub place: Place,
    pub group_id: GroupId,
}
