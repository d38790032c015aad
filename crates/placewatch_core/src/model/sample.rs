//! Raw position fixes delivered by the platform location callbacks.

use crate::model::geo::Coordinate;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};

/// One position fix.
///
/// Samples are immutable once created. Delivery order is authoritative;
/// `timestamp_ms` is informational and may go backwards between deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Device clock, Unix epoch milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "accuracy", default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    #[serde(rename = "heading", default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(rename = "speed", default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

impl LocationSample {
    pub fn new(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        Self {
            coordinate,
            timestamp_ms,
            accuracy_m: None,
            heading_deg: None,
            speed_mps: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_motion(mut self, heading_deg: Option<f64>, speed_mps: Option<f64>) -> Self {
        self.heading_deg = heading_deg;
        self.speed_mps = speed_mps;
        self
    }

    /// Rejects non-finite or out-of-range coordinates and negative accuracy.
    ///
    /// Heading and speed are passed through untouched; platforms report
    /// negative values for "unknown".
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.coordinate.validate()?;
        if let Some(accuracy) = self.accuracy_m {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(ValidationError::Accuracy(accuracy));
            }
        }
        Ok(())
    }
}

/// Picks the newest sample of one platform batch by device timestamp.
///
/// Ties keep the later position in the batch.
pub fn latest_in_batch(samples: &[LocationSample]) -> Option<&LocationSample> {
    samples.iter().fold(None, |best: Option<&LocationSample>, sample| match best {
        Some(current) if current.timestamp_ms > sample.timestamp_ms => Some(current),
        _ => Some(sample),
    })
}
