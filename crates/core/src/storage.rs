//! Storage item layout.
//!
//! | Attribute   | Role                                         |
//! |-------------|----------------------------------------------|
//! | `skierID`   | partition key                                |
//! | `liftInfo`  | range key, `seasonID:liftID:dayID:time`      |
//! | `resortID`  | attribute; indexed with `dayID` for resort-day reads |

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::ride::{RideEvent, RideField};
use crate::wire::WireMessage;

/// Vertical metres credited per lift ride, per unit of lift ID.
pub const VERTICAL_PER_LIFT: u64 = 10;

/// The composite range key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiftInfo {
    pub season_id: String,
    pub lift_id: u32,
    pub day_id: String,
    pub time: u32,
}

impl fmt::Display for LiftInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.season_id, self.lift_id, self.day_id, self.time
        )
    }
}

impl FromStr for LiftInfo {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [season, lift, day, time] = parts.as_slice() else {
            return Err(DecodeError::RangeKey(s.to_string()));
        };
        if season.is_empty() || day.is_empty() {
            return Err(DecodeError::RangeKey(s.to_string()));
        }

        Ok(Self {
            season_id: season.to_string(),
            lift_id: lift.parse().map_err(|_| DecodeError::RangeKey(s.to_string()))?,
            day_id: day.to_string(),
            time: time.parse().map_err(|_| DecodeError::RangeKey(s.to_string()))?,
        })
    }
}

impl Serialize for LiftInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LiftInfo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One row in the ride table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageItem {
    #[serde(rename = "skierID")]
    pub skier_id: String,
    #[serde(rename = "liftInfo")]
    pub lift_info: LiftInfo,
    #[serde(rename = "resortID")]
    pub resort_id: String,
}

impl StorageItem {
    /// Decode a raw queue payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        Self::try_from(&WireMessage::from_slice(payload)?)
    }

    pub fn partition_key(&self) -> &str {
        &self.skier_id
    }

    pub fn range_key(&self) -> String {
        self.lift_info.to_string()
    }

    pub fn season_id(&self) -> &str {
        &self.lift_info.season_id
    }

    pub fn day_id(&self) -> &str {
        &self.lift_info.day_id
    }

    pub fn vertical(&self) -> u64 {
        u64::from(self.lift_info.lift_id) * VERTICAL_PER_LIFT
    }
}

impl From<&RideEvent> for StorageItem {
    fn from(event: &RideEvent) -> Self {
        Self {
            skier_id: event.skier_id.to_string(),
            lift_info: LiftInfo {
                season_id: event.season_id.clone(),
                lift_id: event.lift_id,
                day_id: event.day_id.clone(),
                time: event.time,
            },
            resort_id: event.resort_id.to_string(),
        }
    }
}

impl TryFrom<&WireMessage> for StorageItem {
    type Error = DecodeError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        let skier_id = numeric(RideField::SkierId, &msg.skier_id)?;
        let resort_id = numeric(RideField::ResortId, &msg.resort_id)?;
        let lift_id = numeric(RideField::LiftId, &msg.lift_id)?;
        let time = numeric(RideField::Time, &msg.time)?;

        Ok(Self {
            skier_id: skier_id.to_string(),
            lift_info: LiftInfo {
                season_id: token(RideField::SeasonId, &msg.season_id)?,
                lift_id,
                day_id: token(RideField::DayId, &msg.day_id)?,
                time,
            },
            resort_id: resort_id.to_string(),
        })
    }
}

fn numeric(field: RideField, value: &str) -> Result<u32, DecodeError> {
    value.trim().parse().map_err(|_| DecodeError::NotNumeric {
        field,
        value: value.to_string(),
    })
}

/// Range-key components must be non-empty and free of the `:` separator.
fn token(field: RideField, value: &str) -> Result<String, DecodeError> {
    if value.is_empty() || value.contains(':') {
        return Err(DecodeError::InvalidToken { field });
    }
    Ok(value.to_string())
}
