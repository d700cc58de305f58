//! Time-to-revocation observations ("cases")
//!
//! An observation records how long a price stayed at or below a base price.
//! Uncensored observations end at the first point above the base; censored
//! observations end at the last point of the series without such an event.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::price::SeriesKey;

/// Observations shorter than this are discarded
pub const MIN_TIME_TO_REVOCATION_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub region: String,
    pub zone: String,
    pub instance_type: String,
    /// 1 = Sunday ... 7 = Saturday, from `init_time` in UTC
    pub day_of_week: u8,
    /// 0-23, from `init_time` in UTC
    pub hour_of_day: u8,
    /// Price-addition factor applied to the base price; zero marks an aged-start observation
    pub multiplier: Decimal,
    pub init_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub init_value: Decimal,
    pub end_value: Decimal,
    /// Minutes between `init_time` and `end_time`
    pub time_to_revocation: i64,
    /// Points passed over between the base point and the end point
    pub skip_records: u32,
    pub censored: bool,
}

impl Observation {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.region, &self.zone, &self.instance_type)
    }

    /// Aged-start observations reuse a detected revocation with a later start
    pub fn is_synthetic(&self) -> bool {
        self.multiplier.is_zero()
    }
}

/// Calendar-style day of week, 1 = Sunday ... 7 = Saturday
pub fn day_of_week(instant: DateTime<Utc>) -> u8 {
    instant.weekday().number_from_sunday() as u8
}

pub fn hour_of_day(instant: DateTime<Utc>) -> u8 {
    instant.hour() as u8
}

/// Selects the observations that feed one survival curve
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationQuery {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub instance_type: String,
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl ObservationQuery {
    pub fn for_instance(instance_type: impl Into<String>, day_of_week: u8, hour_of_day: u8) -> Self {
        Self {
            region: None,
            zone: None,
            instance_type: instance_type.into(),
            day_of_week,
            hour_of_day,
        }
    }

    pub fn in_zone(mut self, region: impl Into<String>, zone: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self.zone = Some(zone.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instance_type.trim().is_empty() {
            return Err("instance type is required".to_string());
        }
        if !(1..=7).contains(&self.day_of_week) {
            return Err(format!(
                "invalid day of week {} (expected 1-7, Sunday = 1)",
                self.day_of_week
            ));
        }
        if self.hour_of_day > 23 {
            return Err(format!(
                "invalid hour of day {} (expected 0-23)",
                self.hour_of_day
            ));
        }
        Ok(())
    }

    pub fn matches(&self, observation: &Observation) -> bool {
        observation.instance_type == self.instance_type
            && observation.day_of_week == self.day_of_week
            && observation.hour_of_day == self.hour_of_day
            && self.region.as_ref().is_none_or(|r| *r == observation.region)
            && self.zone.as_ref().is_none_or(|z| *z == observation.zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_of_week_starts_on_sunday() {
        // 2017-09-03 was a Sunday
        let sunday = Utc.with_ymd_and_hms(2017, 9, 3, 10, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2017, 9, 9, 23, 0, 0).unwrap();
        assert_eq!(day_of_week(sunday), 1);
        assert_eq!(day_of_week(saturday), 7);
        assert_eq!(hour_of_day(saturday), 23);
    }

    #[test]
    fn test_query_validation() {
        assert!(ObservationQuery::for_instance("m4.large", 3, 10).validate().is_ok());
        assert!(ObservationQuery::for_instance("", 3, 10).validate().is_err());
        assert!(ObservationQuery::for_instance("m4.large", 0, 10).validate().is_err());
        assert!(ObservationQuery::for_instance("m4.large", 8, 10).validate().is_err());
        assert!(ObservationQuery::for_instance("m4.large", 3, 24).validate().is_err());
    }
}
