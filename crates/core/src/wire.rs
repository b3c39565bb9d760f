//! Queue wire format.
//!
//! A flat JSON object with every value string-encoded:
//!
//! ```json
//! {"skierID":"123","resortID":"3","liftID":"5","seasonID":"2024","dayID":"1","time":"120"}
//! ```
//!
//! Decoding is lenient about JSON numbers so payloads written by older
//! publishers still parse; encoding always writes strings.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DecodeError;
use crate::ride::RideEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "skierID", deserialize_with = "string_or_number")]
    pub skier_id: String,
    #[serde(rename = "resortID", deserialize_with = "string_or_number")]
    pub resort_id: String,
    #[serde(rename = "liftID", deserialize_with = "string_or_number")]
    pub lift_id: String,
    #[serde(rename = "seasonID", deserialize_with = "string_or_number")]
    pub season_id: String,
    #[serde(rename = "dayID", deserialize_with = "string_or_number")]
    pub day_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub time: String,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))
    }
}

impl From<&RideEvent> for WireMessage {
    fn from(event: &RideEvent) -> Self {
        Self {
            skier_id: event.skier_id.to_string(),
            resort_id: event.resort_id.to_string(),
            lift_id: event.lift_id.to_string(),
            season_id: event.season_id.clone(),
            day_id: event.day_id.clone(),
            time: event.time.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}
