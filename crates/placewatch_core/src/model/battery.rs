//! Battery telemetry captured alongside location samples.

use serde::{Deserialize, Serialize};

/// Charging state using the host platform's numeric codes (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Unknown,
    Unplugged,
    Charging,
    Full,
}

impl BatteryState {
    /// Maps a platform code; anything outside 1..=4 is `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Self::Unplugged,
            3 => Self::Charging,
            4 => Self::Full,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 1,
            Self::Unplugged => 2,
            Self::Charging => 3,
            Self::Full => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Unplugged => "unplugged",
            Self::Charging => "charging",
            Self::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "unplugged" => Some(Self::Unplugged),
            "charging" => Some(Self::Charging),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// One battery reading. `level_percent` is `None` when the platform could
/// not report a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub level_percent: Option<u8>,
    pub state: BatteryState,
}

impl BatteryReading {
    pub fn new(level_percent: u8, state: BatteryState) -> Self {
        Self {
            level_percent: Some(level_percent.min(100)),
            state,
        }
    }

    pub fn unknown() -> Self {
        Self {
            level_percent: None,
            state: BatteryState::Unknown,
        }
    }

    /// Converts a platform fraction in `[0, 1]`; negative or NaN means unknown.
    pub fn from_fraction(fraction: f64, state: BatteryState) -> Self {
        if !fraction.is_finite() || fraction < 0.0 {
            return Self {
                level_percent: None,
                state,
            };
        }
        let percent = (fraction.min(1.0) * 100.0).round() as u8;
        Self {
            level_percent: Some(percent),
            state,
        }
    }

    /// Plugged in, either charging or topped off.
    pub fn is_charging(&self) -> bool {
        matches!(self.state, BatteryState::Charging | BatteryState::Full)
    }
}
