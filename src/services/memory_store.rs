//! In-memory price history store
//!
//! Same contract as the Postgres store without a database. The tests run
//! the jobs and the HTTP API against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::price_store::{AppendOutcome, PriceHistoryStore, ReplaceOutcome, StoreError};
use crate::models::observation::{Observation, ObservationQuery};
use crate::models::price::{PricePoint, SeriesKey, TimeRange};

#[derive(Default)]
pub struct InMemoryPriceHistoryStore {
    prices: RwLock<BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, Decimal>>>,
    observations: RwLock<Vec<Observation>>,
}

impl InMemoryPriceHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn price_count(&self) -> usize {
        self.prices.read().values().map(BTreeMap::len).sum()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.read().len()
    }
}

#[async_trait]
impl PriceHistoryStore for InMemoryPriceHistoryStore {
    async fn append_price_points(&self, points: &[PricePoint]) -> Result<AppendOutcome, StoreError> {
        let mut prices = self.prices.write();
        let mut outcome = AppendOutcome::default();

        for point in points {
            let series = prices.entry(point.key()).or_default();
            if series.contains_key(&point.timestamp) {
                outcome.duplicates += 1;
            } else {
                series.insert(point.timestamp, point.price);
                outcome.inserted += 1;
            }
        }

        Ok(outcome)
    }

    async fn latest_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .prices
            .read()
            .get(key)
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn read_price_series(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let prices = self.prices.read();
        let Some(series) = prices.get(key) else {
            return Ok(Vec::new());
        };

        Ok(series
            .iter()
            .filter(|(timestamp, _)| range.is_none_or(|range| range.contains(**timestamp)))
            .map(|(timestamp, price)| PricePoint::new(key, *timestamp, *price))
            .collect())
    }

    async fn append_observations(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        self.observations.write().extend_from_slice(observations);
        Ok(observations.len())
    }

    async fn read_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;

        let mut matching: Vec<Observation> = self
            .observations
            .read()
            .iter()
            .filter(|observation| query.matches(observation))
            .cloned()
            .collect();

        // Stable, so insertion order breaks ties like the id column does
        matching.sort_by_key(|observation| observation.time_to_revocation);
        Ok(matching)
    }

    async fn list_series(&self) -> Result<Vec<SeriesKey>, StoreError> {
        Ok(self
            .prices
            .read()
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear_observations(&self, key: &SeriesKey) -> Result<u64, StoreError> {
        let mut observations = self.observations.write();
        let before = observations.len();
        observations.retain(|observation| observation.key() != *key);
        Ok((before - observations.len()) as u64)
    }

    async fn replace_observations(
        &self,
        key: &SeriesKey,
        observations: &[Observation],
    ) -> Result<ReplaceOutcome, StoreError> {
        if let Some(stray) = observations.iter().find(|o| o.key() != *key) {
            return Err(StoreError::InvalidData(format!(
                "case of {} in replacement for {}",
                stray.key(),
                key
            )));
        }

        let mut stored = self.observations.write();
        let before = stored.len();
        stored.retain(|observation| observation.key() != *key);
        let removed = (before - stored.len()) as u64;
        stored.extend_from_slice(observations);

        Ok(ReplaceOutcome {
            removed,
            inserted: observations.len(),
        })
    }
}
