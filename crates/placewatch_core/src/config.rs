//! Engine configuration.
//!
//! # Responsibility
//! - Hold every tunable the presence engine reads at session start.
//! - Provide defaults matching the shipped mobile behavior.
//!
//! # Invariants
//! - `EngineConfig::validate()` must pass before a runtime is built from it.
//! - Defaults are always valid.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Consecutive in-radius samples required to confirm an arrival.
pub const DEFAULT_ARRIVAL_THRESHOLD: u32 = 3;
/// Number of recent samples kept for diagnostics.
pub const DEFAULT_RECENT_BUFFER_LEN: usize = 5;
/// Member name used when profile lookup fails or is empty.
pub const DEFAULT_MEMBER_PLACEHOLDER: &str = "Someone";
/// Place name used when no name has been observed for a place id.
pub const DEFAULT_PLACE_PLACEHOLDER: &str = "a place";

/// Hysteresis and buffer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub arrival_threshold: u32,
    pub recent_buffer_len: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            arrival_threshold: DEFAULT_ARRIVAL_THRESHOLD,
            recent_buffer_len: DEFAULT_RECENT_BUFFER_LEN,
        }
    }
}

/// Which platform callback delivered a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceKind {
    Foreground,
    Background,
}

impl CadenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

/// Sampling request the platform driver should configure for one cadence.
///
/// These are requests to the OS, not guarantees; core never throttles on them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceProfile {
    pub kind: CadenceKind,
    pub interval_ms: u64,
    pub distance_m: f64,
}

impl CadenceProfile {
    /// Interactive map use: every 10 s or 10 m.
    pub const FOREGROUND: Self = Self {
        kind: CadenceKind::Foreground,
        interval_ms: 10_000,
        distance_m: 10.0,
    };

    /// Power-conscious tracking: every 30 s or 50 m.
    pub const BACKGROUND: Self = Self {
        kind: CadenceKind::Background,
        interval_ms: 30_000,
        distance_m: 50.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub foreground: CadenceProfile,
    pub background: CadenceProfile,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            foreground: CadenceProfile::FOREGROUND,
            background: CadenceProfile::BACKGROUND,
        }
    }
}

impl CadenceConfig {
    pub fn profile(&self, kind: CadenceKind) -> CadenceProfile {
        match kind {
            CadenceKind::Foreground => self.foreground,
            CadenceKind::Background => self.background,
        }
    }
}

/// Call-site policy for outgoing presence notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyPolicy {
    /// Emit events about the signed-in user's own arrivals and departures.
    pub include_self: bool,
    /// Diff the first snapshot of a group subscription against an empty one,
    /// announcing everyone already present. When off, it is cached silently.
    pub announce_initial: bool,
    pub member_placeholder: String,
    pub place_placeholder: String,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            include_self: true,
            announce_initial: true,
            member_placeholder: DEFAULT_MEMBER_PLACEHOLDER.to_string(),
            place_placeholder: DEFAULT_PLACE_PLACEHOLDER.to_string(),
        }
    }
}

/// Top-level configuration for one `PresenceRuntime`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub cadence: CadenceConfig,
    pub notify: NotifyPolicy,
}

impl EngineConfig {
    /// Checks every field against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.arrival_threshold == 0 {
            return Err(ConfigError::ArrivalThresholdZero);
        }
        if self.detection.recent_buffer_len == 0 {
            return Err(ConfigError::RecentBufferEmpty);
        }
        for (expected, profile) in [
            (CadenceKind::Foreground, self.cadence.foreground),
            (CadenceKind::Background, self.cadence.background),
        ] {
            if profile.kind != expected {
                return Err(ConfigError::CadenceKindMismatch {
                    slot: expected,
                    found: profile.kind,
                });
            }
            if profile.interval_ms == 0 {
                return Err(ConfigError::InvalidCadence {
                    kind: expected,
                    reason: "interval_ms must be > 0",
                });
            }
            if !profile.distance_m.is_finite() || profile.distance_m < 0.0 {
                return Err(ConfigError::InvalidCadence {
                    kind: expected,
                    reason: "distance_m must be finite and >= 0",
                });
            }
        }
        if self.notify.member_placeholder.trim().is_empty() {
            return Err(ConfigError::BlankPlaceholder("member_placeholder"));
        }
        if self.notify.place_placeholder.trim().is_empty() {
            return Err(ConfigError::BlankPlaceholder("place_placeholder"));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ArrivalThresholdZero,
    RecentBufferEmpty,
    CadenceKindMismatch {
        slot: CadenceKind,
        found: CadenceKind,
    },
    InvalidCadence {
        kind: CadenceKind,
        reason: &'static str,
    },
    BlankPlaceholder(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArrivalThresholdZero => write!(f, "arrival_threshold must be >= 1"),
            Self::RecentBufferEmpty => write!(f, "recent_buffer_len must be >= 1"),
            Self::CadenceKindMismatch { slot, found } => write!(
                f,
                "{} cadence slot holds a {} profile",
                slot.as_str(),
                found.as_str()
            ),
            Self::InvalidCadence { kind, reason } => {
                write!(f, "invalid {} cadence: {reason}", kind.as_str())
            }
            Self::BlankPlaceholder(field) => write!(f, "{field} must not be blank"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{CadenceKind, CadenceProfile, ConfigError, EngineConfig};

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.detection.arrival_threshold, 3);
        assert_eq!(config.detection.recent_buffer_len, 5);
        assert_eq!(config.cadence.foreground.interval_ms, 10_000);
        assert_eq!(config.cadence.background.distance_m, 50.0);
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut config = EngineConfig::default();
        config.detection.arrival_threshold = 0;
        assert_eq!(config.validate(), Err(ConfigError::ArrivalThresholdZero));
    }

    #[test]
    fn rejects_swapped_cadence_profiles() {
        let mut config = EngineConfig::default();
        config.cadence.foreground = CadenceProfile::BACKGROUND;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CadenceKindMismatch {
                slot: CadenceKind::Foreground,
                ..
            })
        ));
    }

    #[test]
    fn rejects_blank_placeholders() {
        let mut config = EngineConfig::default();
        config.notify.place_placeholder = "  ".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::BlankPlaceholder("place_placeholder"))
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"detection":{"arrival_threshold":4}}"#)
                .expect("partial config parses");
        assert_eq!(config.detection.arrival_threshold, 4);
        assert_eq!(config.detection.recent_buffer_len, 5);
        assert!(config.notify.include_self);
        assert!(config.notify.announce_initial);
        config.validate().expect("partial config validates");
    }
}
