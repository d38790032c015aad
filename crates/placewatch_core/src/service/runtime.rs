//! Host-facing presence runtime.
//!
//! # Responsibility
//! - Own at most one `PresenceSession` at a time.
//! - Validate samples and route them to the active session.
//!
//! # Invariants
//! - Ingestion before the first `initialize` is a caller bug and fails with
//!   `RuntimeError::NotInitialized`.
//! - Ingestion after `teardown` drops the sample and succeeds.
//! - Re-initializing tears the previous session down first.

use super::ingestion::IngestReport;
use super::session::{PresenceSession, SessionId, SessionStatus};
use crate::config::{ConfigError, EngineConfig};
use crate::model::ids::{GroupId, PlaceId, UserId};
use crate::model::place::{Place, PlaceInfo};
use crate::model::sample::LocationSample;
use crate::model::validation::ValidationError;
use crate::spi::Collaborators;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Called before any `initialize`.
    NotInitialized,
    InvalidConfig(ConfigError),
    InvalidSample(ValidationError),
}

impl RuntimeError {
    /// Stable machine-readable code for FFI envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidSample(_) => "invalid_sample",
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "presence runtime used before initialize"),
            Self::InvalidConfig(err) => write!(f, "invalid engine config: {err}"),
            Self::InvalidSample(err) => write!(f, "invalid location sample: {err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotInitialized => None,
            Self::InvalidConfig(err) => Some(err),
            Self::InvalidSample(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

impl From<ValidationError> for RuntimeError {
    fn from(value: ValidationError) -> Self {
        Self::InvalidSample(value)
    }
}

/// Why a valid sample was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No active session; the user signed out.
    SignedOut,
    EmptyBatch,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignedOut => "signed_out",
            Self::EmptyBatch => "empty_batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Processed(IngestReport),
    Dropped(DropReason),
}

pub struct PresenceRuntime {
    config: EngineConfig,
    collaborators: Collaborators,
    session: Option<PresenceSession>,
    initialized_once: bool,
}

impl PresenceRuntime {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> RuntimeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            session: None,
            initialized_once: false,
        })
    }

    pub fn with_defaults(collaborators: Collaborators) -> Self {
        Self {
            config: EngineConfig::default(),
            collaborators,
            session: None,
            initialized_once: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a session for `user_id`, replacing any active one.
    pub fn initialize(&mut self, user_id: UserId) -> SessionId {
        self.teardown();
        let session = PresenceSession::initialize(user_id, &self.config, &self.collaborators);
        let id = session.id();
        self.session = Some(session);
        self.initialized_once = true;
        id
    }

    /// Ends the active session, if any. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn ingest_foreground(&self, sample: &LocationSample) -> RuntimeResult<IngestOutcome> {
        let Some(session) = self.session_for(sample)? else {
            return Ok(IngestOutcome::Dropped(DropReason::SignedOut));
        };
        Ok(IngestOutcome::Processed(
            session.driver().ingest_foreground(sample),
        ))
    }

    pub fn ingest_background(&self, sample: &LocationSample) -> RuntimeResult<IngestOutcome> {
        let Some(session) = self.session_for(sample)? else {
            return Ok(IngestOutcome::Dropped(DropReason::SignedOut));
        };
        Ok(IngestOutcome::Processed(
            session.driver().ingest_background(sample),
        ))
    }

    /// Validates every sample, then ingests the newest one.
    pub fn ingest_background_batch(
        &self,
        samples: &[LocationSample],
    ) -> RuntimeResult<IngestOutcome> {
        self.ensure_initialized()?;
        for sample in samples {
            sample.validate()?;
        }
        let Some(session) = self.active_session("ingest_background_batch") else {
            return Ok(IngestOutcome::Dropped(DropReason::SignedOut));
        };
        Ok(session
            .driver()
            .ingest_background_batch(samples)
            .map_or(IngestOutcome::Dropped(DropReason::EmptyBatch), IngestOutcome::Processed))
    }

    /// Active place by id; `None` when unknown or signed out.
    pub fn place_info(&self, place_id: &PlaceId) -> RuntimeResult<Option<PlaceInfo>> {
        self.ensure_initialized()?;
        Ok(self
            .session
            .as_ref()
            .and_then(|session| session.place_info(place_id)))
    }

    pub fn places_for_group(&self, group_id: &GroupId) -> RuntimeResult<Vec<Place>> {
        self.ensure_initialized()?;
        Ok(self
            .session
            .as_ref()
            .map(|session| session.places_for_group(group_id))
            .unwrap_or_default())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(PresenceSession::status)
    }

    fn ensure_initialized(&self) -> RuntimeResult<()> {
        if self.initialized_once {
            Ok(())
        } else {
            warn!("event=runtime_call module=runtime status=error error_code=not_initialized");
            Err(RuntimeError::NotInitialized)
        }
    }

    fn session_for(&self, sample: &LocationSample) -> RuntimeResult<Option<&PresenceSession>> {
        self.ensure_initialized()?;
        sample.validate()?;
        Ok(self.active_session("ingest"))
    }

    fn active_session(&self, op: &'static str) -> Option<&PresenceSession> {
        let session = self.session.as_ref();
        if session.is_none() {
            info!(
                "event=sample_dropped module=runtime status=skipped op={} reason={}",
                op,
                DropReason::SignedOut.as_str()
            );
        }
        session
    }
}
