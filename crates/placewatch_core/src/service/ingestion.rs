//! Platform callback entry point.
//!
//! # Responsibility
//! - Accept foreground and background samples from the platform driver.
//! - Forward each sample to the fan-out registry.
//! - Forward battery telemetry alongside each sample.
//!
//! # Invariants
//! - Routing always happens before, and independently of, battery reporting.
//! - Unknown battery levels are never reported.

use super::fanout_registry::{GroupFanoutRegistry, RouteOutcome};
use crate::config::{CadenceConfig, CadenceKind, CadenceProfile};
use crate::model::battery::BatteryState;
use crate::model::ids::UserId;
use crate::model::sample::{latest_in_batch, LocationSample};
use crate::spi::{BatteryProbe, SpiError, TelemetrySink};
use log::{debug, warn};
use std::sync::Arc;

/// What happened to the battery reading taken for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatteryOutcome {
    Reported { level_percent: u8, state: BatteryState },
    SkippedUnknownLevel,
    ProbeFailed(SpiError),
    SinkFailed(SpiError),
}

/// Result of ingesting one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub cadence: CadenceKind,
    pub route: RouteOutcome,
    pub battery: BatteryOutcome,
}

pub struct IngestionCadenceDriver {
    user_id: UserId,
    registry: GroupFanoutRegistry,
    battery: Arc<dyn BatteryProbe>,
    telemetry: Arc<dyn TelemetrySink>,
    cadence: CadenceConfig,
}

impl IngestionCadenceDriver {
    pub fn new(
        user_id: UserId,
        registry: GroupFanoutRegistry,
        battery: Arc<dyn BatteryProbe>,
        telemetry: Arc<dyn TelemetrySink>,
        cadence: CadenceConfig,
    ) -> Self {
        Self {
            user_id,
            registry,
            battery,
            telemetry,
            cadence,
        }
    }

    /// Sampling request the platform driver should configure for `kind`.
    pub fn profile(&self, kind: CadenceKind) -> CadenceProfile {
        self.cadence.profile(kind)
    }

    pub fn ingest_foreground(&self, sample: &LocationSample) -> IngestReport {
        self.ingest(CadenceKind::Foreground, sample)
    }

    pub fn ingest_background(&self, sample: &LocationSample) -> IngestReport {
        self.ingest(CadenceKind::Background, sample)
    }

    /// Ingests only the newest sample of one background delivery.
    pub fn ingest_background_batch(&self, samples: &[LocationSample]) -> Option<IngestReport> {
        let latest = latest_in_batch(samples)?;
        if samples.len() > 1 {
            debug!(
                "event=ingest_batch module=ingestion status=ok batch_len={} kept_timestamp={}",
                samples.len(),
                latest.timestamp_ms
            );
        }
        Some(self.ingest(CadenceKind::Background, latest))
    }

    fn ingest(&self, cadence: CadenceKind, sample: &LocationSample) -> IngestReport {
        let route = self.registry.route_sample(sample);
        let battery = self.report_battery();
        debug!(
            "event=ingest_sample module=ingestion status=ok cadence={} groups_routed={}",
            cadence.as_str(),
            route.groups_routed
        );
        IngestReport {
            cadence,
            route,
            battery,
        }
    }

    fn report_battery(&self) -> BatteryOutcome {
        let reading = match self.battery.read() {
            Ok(reading) => reading,
            Err(err) => {
                warn!(
                    "event=battery_read module=ingestion status=error error_code={} error={}",
                    err.code(),
                    err
                );
                return BatteryOutcome::ProbeFailed(err);
            }
        };
        let Some(level_percent) = reading.level_percent else {
            debug!("event=battery_report module=ingestion status=skipped reason=unknown_level");
            return BatteryOutcome::SkippedUnknownLevel;
        };
        match self
            .telemetry
            .report_battery(&self.user_id, level_percent, reading.state)
        {
            Ok(()) => BatteryOutcome::Reported {
                level_percent,
                state: reading.state,
            },
            Err(err) => {
                warn!(
                    "event=battery_report module=ingestion status=error error_code={} error={}",
                    err.code(),
                    err
                );
                BatteryOutcome::SinkFailed(err)
            }
        }
    }
}
