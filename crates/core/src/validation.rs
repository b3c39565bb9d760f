//! Ingress validation of lift ride requests.
//!
//! The URL carries `/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}`
//! and the body carries `{"liftID": .., "time": ..}`. Validation is pure: it
//! either produces a [`RideEvent`] or names the violated constraint.

use serde::Deserialize;

use crate::error::ValidationError;
use crate::ride::{
    FieldRange, LIFT_ID_RANGE, RESORT_ID_RANGE, RideEvent, RideField, SKIER_ID_RANGE, TIME_RANGE,
};

pub const DEFAULT_SEASON_ID: &str = "2024";
pub const DEFAULT_VALID_DAYS: [&str; 3] = ["1", "2", "3"];

/// Segment count of a ride path, including the empty segment before the leading `/`.
const PATH_SEGMENTS: usize = 8;

/// IDs pulled out of a well-formed ride path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RidePath {
    pub resort_id: u32,
    pub season_id: String,
    pub day_id: String,
    pub skier_id: u32,
}

/// A resort on one season day, as addressed by the read-side routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResortDay {
    pub resort_id: u32,
    pub season_id: String,
    pub day_id: String,
}

/// Fields pulled out of a well-formed ride body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RideBody {
    pub lift_id: u32,
    pub time: u32,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    #[serde(rename = "liftID")]
    lift_id: i64,
    time: i64,
}

/// Validates ride requests against the configured season and day set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideValidator {
    season_id: String,
    valid_days: Vec<String>,
}

impl Default for RideValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SEASON_ID, DEFAULT_VALID_DAYS)
    }
}

impl RideValidator {
    pub fn new<I, S>(season_id: impl Into<String>, valid_days: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            season_id: season_id.into(),
            valid_days: valid_days.into_iter().map(Into::into).collect(),
        }
    }

    pub fn season_id(&self) -> &str {
        &self.season_id
    }

    pub fn valid_days(&self) -> &[String] {
        &self.valid_days
    }

    /// Validate the full request: URL first, then body.
    pub fn validate(&self, path: &str, body: &[u8]) -> Result<RideEvent, ValidationError> {
        let path = self.validate_path(path)?;
        let body = self.validate_body(body)?;

        Ok(RideEvent {
            skier_id: path.skier_id,
            resort_id: path.resort_id,
            lift_id: body.lift_id,
            season_id: path.season_id,
            day_id: path.day_id,
            time: body.time,
        })
    }

    /// Validate `/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}`.
    ///
    /// Trailing slashes are ignored.
    pub fn validate_path(&self, path: &str) -> Result<RidePath, ValidationError> {
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if segments.len() != PATH_SEGMENTS || !segments[0].is_empty() {
            return Err(ValidationError::BadPathShape {
                segments: segments.len(),
            });
        }

        expect_literal(segments[2], "seasons")?;
        expect_literal(segments[4], "days")?;
        expect_literal(segments[6], "skiers")?;

        let day = self.check_resort_day(segments[1], segments[3], segments[5])?;
        let skier_id = parse_in_range(SKIER_ID_RANGE, segments[7])?;

        Ok(RidePath {
            resort_id: day.resort_id,
            season_id: day.season_id,
            day_id: day.day_id,
            skier_id,
        })
    }

    /// Validate `/{resortID}/seasons/{seasonID}/days/{dayID}/skiers`.
    pub fn validate_resort_day_path(&self, path: &str) -> Result<ResortDay, ValidationError> {
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if segments.len() != PATH_SEGMENTS - 1 || !segments[0].is_empty() {
            return Err(ValidationError::BadPathShape {
                segments: segments.len(),
            });
        }

        expect_literal(segments[2], "seasons")?;
        expect_literal(segments[4], "days")?;
        expect_literal(segments[6], "skiers")?;

        self.check_resort_day(segments[1], segments[3], segments[5])
    }

    /// Validate a bare `skierID` segment.
    pub fn validate_skier_id(&self, value: &str) -> Result<u32, ValidationError> {
        parse_in_range(SKIER_ID_RANGE, value)
    }

    fn check_resort_day(
        &self,
        resort_id: &str,
        season_id: &str,
        day_id: &str,
    ) -> Result<ResortDay, ValidationError> {
        let resort_id = parse_in_range(RESORT_ID_RANGE, resort_id)?;

        parse_number(RideField::SeasonId, season_id)?;
        if season_id != self.season_id {
            return Err(ValidationError::SeasonMismatch {
                expected: self.season_id.clone(),
                found: season_id.to_string(),
            });
        }

        parse_number(RideField::DayId, day_id)?;
        if !self.valid_days.iter().any(|d| d == day_id) {
            return Err(ValidationError::UnknownDay {
                value: day_id.to_string(),
            });
        }

        Ok(ResortDay {
            resort_id,
            season_id: season_id.to_string(),
            day_id: day_id.to_string(),
        })
    }

    /// Validate a `{"liftID": .., "time": ..}` body.
    pub fn validate_body(&self, body: &[u8]) -> Result<RideBody, ValidationError> {
        let raw: RawBody = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;

        Ok(RideBody {
            lift_id: LIFT_ID_RANGE.check(raw.lift_id)?,
            time: TIME_RANGE.check(raw.time)?,
        })
    }
}

fn expect_literal(found: &str, expected: &'static str) -> Result<(), ValidationError> {
    if found != expected {
        return Err(ValidationError::LiteralMismatch {
            expected,
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Parse a path segment made only of ASCII digits.
///
/// Digit strings too long for `i64` saturate so the range check reports them.
fn parse_number(field: RideField, value: &str) -> Result<i64, ValidationError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NotNumeric {
            field,
            value: value.to_string(),
        });
    }
    Ok(value.parse::<i64>().unwrap_or(i64::MAX))
}

fn parse_in_range(range: FieldRange, value: &str) -> Result<u32, ValidationError> {
    let n = parse_number(range.field, value)?;
    range.check(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BODY: &[u8] = br#"{"liftID":5,"time":120}"#;

    fn path(resort: &str, season: &str, day: &str, skier: &str) -> String {
        format!("/{resort}/seasons/{season}/days/{day}/skiers/{skier}")
    }

    #[test]
    fn accepts_well_formed_request() {
        let v = RideValidator::default();
        let event = v.validate(&path("3", "2024", "1", "123"), BODY).unwrap();

        assert_eq!(
            event,
            RideEvent {
                skier_id: 123,
                resort_id: 3,
                lift_id: 5,
                season_id: "2024".to_string(),
                day_id: "1".to_string(),
                time: 120,
            }
        );
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let v = RideValidator::default();
        assert!(v.validate_path("/3/seasons/2024/days/1/skiers/123/").is_ok());
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let v = RideValidator::default();
        assert_eq!(
            v.validate_path("/3/seasons/2024/days/1/skiers"),
            Err(ValidationError::BadPathShape { segments: 7 })
        );
        assert!(matches!(
            v.validate_path("/3/seasons/2024/days/1/skiers/123/extra"),
            Err(ValidationError::BadPathShape { segments: 9 })
        ));
        assert!(matches!(
            v.validate_path("3/seasons/2024/days/1/skiers/123/x"),
            Err(ValidationError::BadPathShape { .. })
        ));
    }

    #[test]
    fn rejects_wrong_literals() {
        let v = RideValidator::default();
        let err = v.validate_path("/3/season/2024/days/1/skiers/123").unwrap_err();
        assert_eq!(
            err,
            ValidationError::LiteralMismatch {
                expected: "seasons",
                found: "season".to_string(),
            }
        );
        assert!(v.validate_path("/3/seasons/2024/day/1/skiers/123").is_err());
        assert!(v.validate_path("/3/seasons/2024/days/1/skier/123").is_err());
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let v = RideValidator::default();
        let err = v.validate_path(&path("abc", "2024", "1", "123")).unwrap_err();
        assert_eq!(err.field(), Some(RideField::ResortId));

        let err = v.validate_path(&path("3", "2024", "1", "-5")).unwrap_err();
        assert_eq!(err.field(), Some(RideField::SkierId));

        let err = v.validate_path(&path("3", "2024", "1.5", "5")).unwrap_err();
        assert_eq!(err.field(), Some(RideField::DayId));
    }

    #[test]
    fn rejects_unknown_day_and_season() {
        let v = RideValidator::default();

        let err = v.validate_path(&path("3", "2024", "9", "123")).unwrap_err();
        assert_eq!(err, ValidationError::UnknownDay { value: "9".to_string() });
        assert_eq!(err.field(), Some(RideField::DayId));

        let err = v.validate_path(&path("3", "2023", "1", "123")).unwrap_err();
        assert_eq!(err.field(), Some(RideField::SeasonId));
    }

    #[test]
    fn configured_season_and_days_are_honoured() {
        let v = RideValidator::new("2025", ["4"]);
        assert!(v.validate_path(&path("3", "2025", "4", "1")).is_ok());
        assert!(v.validate_path(&path("3", "2024", "4", "1")).is_err());
        assert!(v.validate_path(&path("3", "2025", "1", "1")).is_err());
    }

    #[test]
    fn oversized_numbers_are_out_of_range() {
        let v = RideValidator::default();
        let err = v
            .validate_path(&path("3", "2024", "1", "99999999999999999999999"))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange {
                field: RideField::SkierId,
                value: i64::MAX,
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_bodies() {
        let v = RideValidator::default();
        let bodies: [&[u8]; 6] = [
            b"not json",
            br#"{"liftID":5}"#,
            br#"{"time":5}"#,
            br#"{"liftID":"five","time":5}"#,
            br#"{"liftID":5.5,"time":5}"#,
            b"",
        ];
        for body in bodies {
            let err = v.validate_body(body).unwrap_err();
            assert!(matches!(err, ValidationError::MalformedBody(_)), "{body:?}");
            assert!(err.in_body());
        }
    }

    #[test]
    fn body_range_errors_are_body_errors() {
        let v = RideValidator::default();
        let err = v.validate_body(br#"{"liftID":41,"time":5}"#).unwrap_err();
        assert_eq!(err.field(), Some(RideField::LiftId));
        assert!(err.in_body());

        let err = v.validate_body(br#"{"liftID":4,"time":0}"#).unwrap_err();
        assert_eq!(err.field(), Some(RideField::Time));

        let err = v.validate_path(&path("11", "2024", "1", "1")).unwrap_err();
        assert!(!err.in_body());
    }

    #[test]
    fn resort_day_and_skier_paths() {
        let v = RideValidator::default();
        let day = v.validate_resort_day_path("/3/seasons/2024/days/2/skiers").unwrap();
        assert_eq!(
            day,
            ResortDay {
                resort_id: 3,
                season_id: "2024".to_string(),
                day_id: "2".to_string(),
            }
        );

        assert!(matches!(
            v.validate_resort_day_path("/3/seasons/2024/days/2/skiers/1"),
            Err(ValidationError::BadPathShape { segments: 8 })
        ));
        assert!(matches!(
            v.validate_resort_day_path("/11/seasons/2024/days/2/skiers"),
            Err(ValidationError::OutOfRange { field: RideField::ResortId, .. })
        ));

        assert_eq!(v.validate_skier_id("42"), Ok(42));
        assert!(matches!(
            v.validate_skier_id("0"),
            Err(ValidationError::OutOfRange { field: RideField::SkierId, .. })
        ));
    }

    #[test]
    fn path_is_checked_before_body() {
        let v = RideValidator::default();
        let err = v.validate(&path("0", "2024", "1", "1"), b"garbage").unwrap_err();
        assert_eq!(err.field(), Some(RideField::ResortId));
    }

    proptest! {
        #[test]
        fn in_range_rides_are_accepted(
            resort in 1u32..=10,
            day in 1u32..=3,
            skier in 1u32..=100_000,
            lift in 1u32..=40,
            time in 1u32..=360,
        ) {
            let v = RideValidator::default();
            let body = format!(r#"{{"liftID":{lift},"time":{time}}}"#);
            let event = v
                .validate(&path(&resort.to_string(), "2024", &day.to_string(), &skier.to_string()), body.as_bytes())
                .unwrap();
            prop_assert_eq!(event.resort_id, resort);
            prop_assert_eq!(event.skier_id, skier);
            prop_assert_eq!(event.lift_id, lift);
            prop_assert_eq!(event.time, time);
        }

        #[test]
        fn out_of_range_resort_names_resort(resort in prop_oneof![Just(0u64), 11u64..1_000_000]) {
            let v = RideValidator::default();
            let err = v.validate(&path(&resort.to_string(), "2024", "1", "7"), BODY).unwrap_err();
            prop_assert_eq!(err.field(), Some(RideField::ResortId));
        }

        #[test]
        fn out_of_range_skier_names_skier(skier in prop_oneof![Just(0u64), 100_001u64..10_000_000]) {
            let v = RideValidator::default();
            let err = v.validate(&path("2", "2024", "1", &skier.to_string()), BODY).unwrap_err();
            prop_assert_eq!(err.field(), Some(RideField::SkierId));
        }

        #[test]
        fn out_of_range_lift_names_lift(lift in prop_oneof![-1000i64..=0, 41i64..10_000]) {
            let v = RideValidator::default();
            let body = format!(r#"{{"liftID":{lift},"time":10}}"#);
            let err = v.validate(&path("2", "2024", "1", "7"), body.as_bytes()).unwrap_err();
            prop_assert_eq!(err.field(), Some(RideField::LiftId));
        }

        #[test]
        fn out_of_range_time_names_time(time in prop_oneof![-1000i64..=0, 361i64..10_000]) {
            let v = RideValidator::default();
            let body = format!(r#"{{"liftID":3,"time":{time}}}"#);
            let err = v.validate(&path("2", "2024", "1", "7"), body.as_bytes()).unwrap_err();
            prop_assert_eq!(err.field(), Some(RideField::Time));
        }

        #[test]
        fn days_outside_the_set_name_day(day in 4u32..1000) {
            let v = RideValidator::default();
            let err = v.validate(&path("2", "2024", &day.to_string(), "7"), BODY).unwrap_err();
            prop_assert_eq!(err.field(), Some(RideField::DayId));
        }
    }
}
