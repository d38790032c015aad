//! Shared validation errors for model values.

use crate::model::ids::IdError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Reasons a sample, coordinate or place is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Latitude(f64),
    Longitude(f64),
    Radius(f64),
    Accuracy(f64),
    GroupMismatch { expected: String, found: String },
    Id(IdError),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latitude(value) => write!(f, "latitude {value} is outside [-90, 90]"),
            Self::Longitude(value) => write!(f, "longitude {value} is outside [-180, 180]"),
            Self::Radius(value) => write!(f, "radius {value} must be finite and > 0"),
            Self::Accuracy(value) => write!(f, "accuracy {value} must be finite and >= 0"),
            Self::GroupMismatch { expected, found } => {
                write!(f, "place belongs to group {found}, expected {expected}")
            }
            Self::Id(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Id(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IdError> for ValidationError {
    fn from(value: IdError) -> Self {
        Self::Id(value)
    }
}
