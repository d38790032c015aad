//! Persistence-backed collaborator implementations.
//!
//! # Responsibility
//! - Provide a durable `PresenceStore` for hosts without their own backend.
//! - Keep SQL details out of detection and notification code.
//!
//! # Invariants
//! - Read paths reject invalid persisted identifiers instead of masking them.
//! - Every effective write is followed by a snapshot push for its group.

use crate::db::DbError;
use crate::spi::SpiError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod presence_repo;

pub use presence_repo::SqlitePresenceStore;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => {
                write!(f, "invalid persisted presence data: {message}")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for SpiError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value.to_string())
    }
}
