//! Case generation
//!
//! Turns one chronologically sorted price series into time-to-revocation
//! observations. For every point the series is scanned forward for the first
//! price above the (scaled) base price:
//! - found, at least an hour later: one uncensored observation, followed by
//!   aged-start observations that start 1h, 2h, ... later and end at the same
//!   event while they still last at least an hour
//! - never found: one right-censored observation ending at the last point,
//!   when that is at least an hour away
//!
//! Everything here is synchronous and side-effect free.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::observation::{
    day_of_week, hour_of_day, Observation, MIN_TIME_TO_REVOCATION_MINUTES,
};
use crate::models::price::{PricePoint, SeriesKey};

/// Decimal places of stored case prices, matching `NUMERIC(20, 8)`
pub const CASE_PRICE_SCALE: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaseGenerationError {
    #[error("price series is empty")]
    EmptySeries,
    #[error("price series is not sorted by timestamp at point {index}")]
    UnsortedSeries { index: usize },
    #[error("price series mixes {expected} with {found} at point {index}")]
    MixedSeries {
        index: usize,
        expected: SeriesKey,
        found: SeriesKey,
    },
}

/// How the base price of each point is scaled before looking for a revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PriceAugmentation {
    /// Revocation as soon as the price rises above the point's own price
    #[default]
    Exact,
    /// Tolerate prices up to `factor` times the point's price (e.g. 1.1 for +10%)
    Headroom(Decimal),
}

impl PriceAugmentation {
    pub fn multiplier(&self) -> Decimal {
        match self {
            PriceAugmentation::Exact => dec!(1.0),
            PriceAugmentation::Headroom(factor) => *factor,
        }
    }
}

/// Observations produced with one augmentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationGroup {
    pub multiplier: Decimal,
    pub observations: Vec<Observation>,
}

/// Runs the generation once per configured augmentation
#[derive(Debug, Clone)]
pub struct CaseGenerator {
    augmentations: Vec<PriceAugmentation>,
}

impl Default for CaseGenerator {
    fn default() -> Self {
        Self::new(vec![PriceAugmentation::Exact])
    }
}

impl CaseGenerator {
    pub fn new(augmentations: Vec<PriceAugmentation>) -> Self {
        Self { augmentations }
    }

    pub fn augmentations(&self) -> &[PriceAugmentation] {
        &self.augmentations
    }

    /// Generate observations for every augmentation, grouped by multiplier
    pub fn generate(
        &self,
        series: &[PricePoint],
    ) -> Result<Vec<ObservationGroup>, CaseGenerationError> {
        validate_series(series)?;

        Ok(self
            .augmentations
            .iter()
            .map(|augmentation| {
                let multiplier = augmentation.multiplier();
                ObservationGroup {
                    multiplier,
                    observations: scan_series(series, multiplier),
                }
            })
            .collect())
    }
}

/// Generate observations for a single multiplier
pub fn generate_observations(
    series: &[PricePoint],
    multiplier: Decimal,
) -> Result<Vec<Observation>, CaseGenerationError> {
    validate_series(series)?;
    Ok(scan_series(series, multiplier))
}

fn validate_series(series: &[PricePoint]) -> Result<(), CaseGenerationError> {
    let first = series.first().ok_or(CaseGenerationError::EmptySeries)?;
    let key = first.key();

    for (index, window) in series.windows(2).enumerate() {
        let current = &window[1];
        if !current.belongs_to(&key) {
            return Err(CaseGenerationError::MixedSeries {
                index: index + 1,
                expected: key,
                found: current.key(),
            });
        }
        if current.timestamp < window[0].timestamp {
            return Err(CaseGenerationError::UnsortedSeries { index: index + 1 });
        }
    }

    Ok(())
}

fn scan_series(series: &[PricePoint], multiplier: Decimal) -> Vec<Observation> {
    let mut observations = Vec::new();
    let last = &series[series.len() - 1];

    for (i, base_point) in series.iter().enumerate() {
        let base_time = base_point.timestamp;
        let base_price = (base_point.price * multiplier).round_dp(CASE_PRICE_SCALE);

        let revocation = series[i + 1..]
            .iter()
            .position(|candidate| candidate.price > base_price);

        match revocation {
            Some(offset) => {
                let event = &series[i + 1 + offset];
                let minutes = minutes_between(base_time, event.timestamp);

                // An event within the first hour discards this start point
                if minutes < MIN_TIME_TO_REVOCATION_MINUTES {
                    continue;
                }

                observations.push(build_observation(
                    base_point,
                    base_time,
                    base_price,
                    event,
                    multiplier,
                    offset as u32,
                    false,
                ));

                push_aged_starts(&mut observations, base_point, base_time, base_price, event);
            }
            None => {
                let minutes = minutes_between(base_time, last.timestamp);
                if minutes >= MIN_TIME_TO_REVOCATION_MINUTES {
                    let scanned = (series.len() - 1 - i) as u32;
                    observations.push(build_observation(
                        base_point, base_time, base_price, last, multiplier, scanned, true,
                    ));
                }
            }
        }
    }

    observations
}

/// Starts sliding forward one hour at a time towards the same event
fn push_aged_starts(
    observations: &mut Vec<Observation>,
    base_point: &PricePoint,
    base_time: DateTime<Utc>,
    base_price: Decimal,
    event: &PricePoint,
) {
    let mut hours = 1;
    loop {
        let aged_start = base_time + Duration::hours(hours);
        if minutes_between(aged_start, event.timestamp) < MIN_TIME_TO_REVOCATION_MINUTES {
            break;
        }

        observations.push(build_observation(
            base_point,
            aged_start,
            base_price,
            event,
            Decimal::ZERO,
            0,
            false,
        ));
        hours += 1;
    }
}

fn build_observation(
    base_point: &PricePoint,
    init_time: DateTime<Utc>,
    init_value: Decimal,
    end_point: &PricePoint,
    multiplier: Decimal,
    skip_records: u32,
    censored: bool,
) -> Observation {
    Observation {
        region: base_point.region.clone(),
        zone: base_point.zone.clone(),
        instance_type: base_point.instance_type.clone(),
        day_of_week: day_of_week(init_time),
        hour_of_day: hour_of_day(init_time),
        multiplier,
        init_time,
        end_time: end_point.timestamp,
        init_value,
        end_value: end_point.price,
        time_to_revocation: minutes_between(init_time, end_point.timestamp),
        skip_records,
        censored,
    }
}

/// Whole minutes, truncated
fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}
