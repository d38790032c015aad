//! Validated identifiers for users, groups and places.
//!
//! # Invariants
//! - Stored values are trimmed and non-empty.
//! - Values never contain the host database's reserved key characters
//!   (`.`, `#`, `$`, `[`, `]`, `/`) or ASCII control characters.
//! - Values are at most 768 bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const MAX_ID_BYTES: usize = 768;

static ENTITY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^.#$\[\]/\x00-\x1F\x7F]+$").expect("valid entity id regex"));

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    Empty { kind: &'static str },
    TooLong { kind: &'static str, len: usize },
    ReservedCharacters { kind: &'static str, value: String },
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty { kind } => write!(f, "{kind} must not be empty"),
            Self::TooLong { kind, len } => {
                write!(f, "{kind} is {len} bytes; maximum is {MAX_ID_BYTES}")
            }
            Self::ReservedCharacters { kind, value } => {
                write!(f, "{kind} contains reserved characters: `{value}`")
            }
        }
    }
}

impl Error for IdError {}

fn validate_entity_id(kind: &'static str, raw: &str) -> Result<String, IdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if trimmed.len() > MAX_ID_BYTES {
        return Err(IdError::TooLong {
            kind,
            len: trimmed.len(),
        });
    }
    if !ENTITY_ID_RE.is_match(trimmed) {
        return Err(IdError::ReservedCharacters {
            kind,
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and trims a raw identifier.
            pub fn parse(value: impl AsRef<str>) -> Result<Self, IdError> {
                validate_entity_id($kind, value.as_ref()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

entity_id!(
    /// Authenticated user identifier as issued by the host auth provider.
    UserId,
    "user_id"
);
entity_id!(
    /// Group identifier; a group owns its places and presence set.
    GroupId,
    "group_id"
);
entity_id!(
    /// Place identifier; globally unique database key.
    PlaceId,
    "place_id"
);
