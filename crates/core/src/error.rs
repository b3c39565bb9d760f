//! Domain error model.

use thiserror::Error;

use crate::ride::RideField;

/// Why an inbound lift ride was rejected at the ingress boundary.
///
/// Validation failures are client faults: they are never retried and never
/// reach the queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The path does not have the `/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}` shape.
    #[error("expected 8 path segments, found {segments}")]
    BadPathShape { segments: usize },

    /// A literal path segment (`seasons`, `days`, `skiers`) did not match.
    #[error("expected path segment `{expected}`, found `{found}`")]
    LiteralMismatch {
        expected: &'static str,
        found: String,
    },

    /// An ID segment is not a non-negative integer.
    #[error("{field} must be a non-negative integer, found `{value}`")]
    NotNumeric { field: RideField, value: String },

    /// A numeric field is outside its documented range.
    #[error("{field} must be between {min} and {max}, found {value}")]
    OutOfRange {
        field: RideField,
        value: i64,
        min: u32,
        max: u32,
    },

    /// The day is not one of the configured days.
    #[error("dayID `{value}` is not an accepted day")]
    UnknownDay { value: String },

    /// The season is not the configured season token.
    #[error("seasonID `{found}` does not match the current season `{expected}`")]
    SeasonMismatch { expected: String, found: String },

    /// The body is not a JSON object carrying integer `liftID` and `time`.
    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl ValidationError {
    /// The field that violated its constraint, when a single field is to blame.
    pub fn field(&self) -> Option<RideField> {
        match self {
            Self::NotNumeric { field, .. } | Self::OutOfRange { field, .. } => Some(*field),
            Self::UnknownDay { .. } => Some(RideField::DayId),
            Self::SeasonMismatch { .. } => Some(RideField::SeasonId),
            Self::BadPathShape { .. } | Self::LiteralMismatch { .. } | Self::MalformedBody(_) => None,
        }
    }

    /// Whether the failure came from the request body rather than the URL.
    pub fn in_body(&self) -> bool {
        match self {
            Self::MalformedBody(_) => true,
            other => other.field().is_some_and(RideField::in_body),
        }
    }
}

/// A queue payload that could not be turned into a storage item.
///
/// Consumers log and drop these; they never crash a worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not a wire message: {0}")]
    Json(String),

    #[error("field {field} is not numeric: `{value}`")]
    NotNumeric { field: RideField, value: String },

    #[error("field {field} is empty or contains `:`")]
    InvalidToken { field: RideField },

    #[error("malformed range key `{0}`")]
    RangeKey(String),
}
