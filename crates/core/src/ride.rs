//! The lift ride record and its field constraints.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Fields of a lift ride, named as they appear on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideField {
    #[serde(rename = "skierID")]
    SkierId,
    #[serde(rename = "resortID")]
    ResortId,
    #[serde(rename = "liftID")]
    LiftId,
    #[serde(rename = "seasonID")]
    SeasonId,
    #[serde(rename = "dayID")]
    DayId,
    #[serde(rename = "time")]
    Time,
}

impl RideField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideField::SkierId => "skierID",
            RideField::ResortId => "resortID",
            RideField::LiftId => "liftID",
            RideField::SeasonId => "seasonID",
            RideField::DayId => "dayID",
            RideField::Time => "time",
        }
    }

    /// `liftID` and `time` travel in the request body; everything else in the URL.
    pub fn in_body(self) -> bool {
        matches!(self, RideField::LiftId | RideField::Time)
    }
}

impl fmt::Display for RideField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive numeric bounds for one ride field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldRange {
    pub field: RideField,
    pub min: u32,
    pub max: u32,
}

impl FieldRange {
    pub const fn new(field: RideField, min: u32, max: u32) -> Self {
        Self { field, min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= i64::from(self.min) && value <= i64::from(self.max)
    }

    /// Check `value` against the bounds, narrowing it on success.
    pub fn check(&self, value: i64) -> Result<u32, ValidationError> {
        if !self.contains(value) {
            return Err(ValidationError::OutOfRange {
                field: self.field,
                value,
                min: self.min,
                max: self.max,
            });
        }
        // In range implies it fits.
        Ok(value as u32)
    }
}

pub const SKIER_ID_RANGE: FieldRange = FieldRange::new(RideField::SkierId, 1, 100_000);
pub const RESORT_ID_RANGE: FieldRange = FieldRange::new(RideField::ResortId, 1, 10);
pub const LIFT_ID_RANGE: FieldRange = FieldRange::new(RideField::LiftId, 1, 40);
pub const TIME_RANGE: FieldRange = FieldRange::new(RideField::Time, 1, 360);

/// One validated lift ride.
///
/// Built by the ingress path from the request URL and body, serialised to a
/// [`WireMessage`](crate::WireMessage) and then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideEvent {
    #[serde(rename = "skierID")]
    pub skier_id: u32,
    #[serde(rename = "resortID")]
    pub resort_id: u32,
    #[serde(rename = "liftID")]
    pub lift_id: u32,
    #[serde(rename = "seasonID")]
    pub season_id: String,
    #[serde(rename = "dayID")]
    pub day_id: String,
    pub time: u32,
}
