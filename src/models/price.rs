//! Spot price series models
//!
//! A series is every price point of one (region, zone, instance type) triple.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one price series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesKey {
    pub region: String,
    pub zone: String,
    pub instance_type: String,
}

impl SeriesKey {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            instance_type: instance_type.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.instance_type)
    }
}

/// A single spot price observed at an instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub region: String,
    pub zone: String,
    pub instance_type: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(key: &SeriesKey, timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            region: key.region.clone(),
            zone: key.zone.clone(),
            instance_type: key.instance_type.clone(),
            timestamp,
            price,
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.region, &self.zone, &self.instance_type)
    }

    pub fn belongs_to(&self, key: &SeriesKey) -> bool {
        self.region == key.region && self.zone == key.zone && self.instance_type == key.instance_type
    }
}

/// Inclusive time window for series reads.
///
/// Both bounds are always present; a read is either bounded on both sides or
/// not bounded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Returns None when `from` is after `to`
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        if from > to {
            None
        } else {
            Some(Self { from, to })
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant <= self.to
    }
}
