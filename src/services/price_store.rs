//! Price history store
//!
//! Persistence for price points and survival cases. [`SeaOrmPriceHistoryStore`]
//! is the Postgres implementation used by the binaries; every call checks a
//! handle out of the bounded [`ConnectionPool`] for its duration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use thiserror::Error;
use tracing::debug;

use super::connection_pool::{ConnectionPool, PoolError};
use crate::entities::{prelude::*, spot_price_history, survival_cases};
use crate::models::observation::{Observation, ObservationQuery};
use crate::models::price::{PricePoint, SeriesKey, TimeRange};

/// Rows per multi-row case insert
const OBSERVATION_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Result of a price batch; duplicates are not failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    /// Insert a batch, skipping points whose (region, zone, instance, timestamp) already exists
    async fn append_price_points(&self, points: &[PricePoint]) -> Result<AppendOutcome, StoreError>;

    async fn latest_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Points of one series, ascending by timestamp
    async fn read_price_series(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<Vec<PricePoint>, StoreError>;

    /// Insert a batch of cases; any failure rejects the whole batch
    async fn append_observations(&self, observations: &[Observation]) -> Result<usize, StoreError>;

    /// Cases matching the query, ascending by time to revocation
    async fn read_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>, StoreError>;

    /// Every series with at least one stored price
    async fn list_series(&self) -> Result<Vec<SeriesKey>, StoreError>;

    /// Delete the cases of one series, returning how many were removed
    async fn clear_observations(&self, key: &SeriesKey) -> Result<u64, StoreError>;

    /// Swap the cases of one series for `observations` in a single write.
    /// On error the previous cases are left untouched.
    async fn replace_observations(
        &self,
        key: &SeriesKey,
        observations: &[Observation],
    ) -> Result<ReplaceOutcome, StoreError>;
}

/// Result of swapping the cases of one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub removed: u64,
    pub inserted: usize,
}

pub struct SeaOrmPriceHistoryStore {
    pool: ConnectionPool<DatabaseConnection>,
    /// Stamped into `execution_time` of every stored price
    started_at: DateTime<Utc>,
}

impl SeaOrmPriceHistoryStore {
    pub fn new(pool: ConnectionPool<DatabaseConnection>) -> Self {
        Self {
            pool,
            started_at: Utc::now(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<DatabaseConnection> {
        &self.pool
    }
}

#[async_trait]
impl PriceHistoryStore for SeaOrmPriceHistoryStore {
    async fn append_price_points(&self, points: &[PricePoint]) -> Result<AppendOutcome, StoreError> {
        if points.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let conn = self.pool.acquire().await?;
        let txn = conn.begin().await?;
        let execution_time = self.started_at.fixed_offset();
        let mut outcome = AppendOutcome::default();

        for point in points {
            let row = spot_price_history::ActiveModel {
                region: Set(point.region.clone()),
                zone: Set(point.zone.clone()),
                instance: Set(point.instance_type.clone()),
                timestamp: Set(point.timestamp.fixed_offset()),
                price: Set(point.price),
                time_epoch_ms: Set(point.timestamp.timestamp_millis()),
                execution_time: Set(execution_time),
                ..Default::default()
            };

            let affected = SpotPriceHistory::insert(row)
                .on_conflict(
                    OnConflict::columns([
                        spot_price_history::Column::Region,
                        spot_price_history::Column::Zone,
                        spot_price_history::Column::Instance,
                        spot_price_history::Column::Timestamp,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;

            if affected == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        txn.commit().await?;

        debug!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "Stored price batch"
        );
        Ok(outcome)
    }

    async fn latest_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.pool.acquire().await?;

        let latest = SpotPriceHistory::find()
            .filter(spot_price_history::Column::Region.eq(&key.region))
            .filter(spot_price_history::Column::Zone.eq(&key.zone))
            .filter(spot_price_history::Column::Instance.eq(&key.instance_type))
            .order_by_desc(spot_price_history::Column::Timestamp)
            .one(&*conn)
            .await?;

        Ok(latest.map(|row| row.timestamp.with_timezone(&Utc)))
    }

    async fn read_price_series(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let conn = self.pool.acquire().await?;

        let mut query = SpotPriceHistory::find()
            .filter(spot_price_history::Column::Region.eq(&key.region))
            .filter(spot_price_history::Column::Zone.eq(&key.zone))
            .filter(spot_price_history::Column::Instance.eq(&key.instance_type));

        if let Some(range) = range {
            query = query
                .filter(spot_price_history::Column::Timestamp.gte(range.from.fixed_offset()))
                .filter(spot_price_history::Column::Timestamp.lte(range.to.fixed_offset()));
        }

        let rows = query
            .order_by_asc(spot_price_history::Column::Timestamp)
            .all(&*conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| PricePoint {
                region: row.region,
                zone: row.zone,
                instance_type: row.instance,
                timestamp: row.timestamp.with_timezone(&Utc),
                price: row.price,
            })
            .collect())
    }

    async fn append_observations(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        if observations.is_empty() {
            return Ok(0);
        }

        let conn = self.pool.acquire().await?;
        let txn = conn.begin().await?;

        for chunk in observations.chunks(OBSERVATION_CHUNK_SIZE) {
            let rows = chunk.iter().map(observation_to_row);
            SurvivalCases::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        // Dropping an uncommitted transaction rolls it back
        txn.commit().await?;

        debug!(count = observations.len(), "Stored survival cases");
        Ok(observations.len())
    }

    async fn read_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;

        let conn = self.pool.acquire().await?;

        let mut select = SurvivalCases::find()
            .filter(survival_cases::Column::Instance.eq(&query.instance_type))
            .filter(survival_cases::Column::DayOfWeek.eq(query.day_of_week as i16))
            .filter(survival_cases::Column::HourOfDay.eq(query.hour_of_day as i16));

        if let Some(region) = &query.region {
            select = select.filter(survival_cases::Column::Region.eq(region));
        }
        if let Some(zone) = &query.zone {
            select = select.filter(survival_cases::Column::Zone.eq(zone));
        }

        let rows = select
            .order_by_asc(survival_cases::Column::TimeToRevocation)
            .order_by_asc(survival_cases::Column::Id)
            .all(&*conn)
            .await?;

        rows.into_iter().map(row_to_observation).collect()
    }

    async fn list_series(&self) -> Result<Vec<SeriesKey>, StoreError> {
        let conn = self.pool.acquire().await?;

        let keys: Vec<(String, String, String)> = SpotPriceHistory::find()
            .select_only()
            .column(spot_price_history::Column::Region)
            .column(spot_price_history::Column::Zone)
            .column(spot_price_history::Column::Instance)
            .distinct()
            .order_by_asc(spot_price_history::Column::Region)
            .order_by_asc(spot_price_history::Column::Zone)
            .order_by_asc(spot_price_history::Column::Instance)
            .into_tuple()
            .all(&*conn)
            .await?;

        Ok(keys
            .into_iter()
            .map(|(region, zone, instance)| SeriesKey::new(region, zone, instance))
            .collect())
    }

    async fn clear_observations(&self, key: &SeriesKey) -> Result<u64, StoreError> {
        let conn = self.pool.acquire().await?;

        let result = SurvivalCases::delete_many()
            .filter(survival_cases::Column::Region.eq(&key.region))
            .filter(survival_cases::Column::Zone.eq(&key.zone))
            .filter(survival_cases::Column::Instance.eq(&key.instance_type))
            .exec(&*conn)
            .await?;

        Ok(result.rows_affected)
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

        let conn = self.pool.acquire().await?;
        let txn = conn.begin().await?;

        let removed = SurvivalCases::delete_many()
            .filter(survival_cases::Column::Region.eq(&key.region))
            .filter(survival_cases::Column::Zone.eq(&key.zone))
            .filter(survival_cases::Column::Instance.eq(&key.instance_type))
            .exec(&txn)
            .await?
            .rows_affected;

        for chunk in observations.chunks(OBSERVATION_CHUNK_SIZE) {
            let rows = chunk.iter().map(observation_to_row);
            SurvivalCases::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        // Delete and insert become visible together or not at all
        txn.commit().await?;

        debug!(series = %key, removed, inserted = observations.len(), "Replaced survival cases");
        Ok(ReplaceOutcome {
            removed,
            inserted: observations.len(),
        })
    }
}

fn observation_to_row(observation: &Observation) -> survival_cases::ActiveModel {
    survival_cases::ActiveModel {
        region: Set(observation.region.clone()),
        zone: Set(observation.zone.clone()),
        instance: Set(observation.instance_type.clone()),
        day_of_week: Set(observation.day_of_week as i16),
        hour_of_day: Set(observation.hour_of_day as i16),
        censored: Set(observation.censored),
        init_time: Set(observation.init_time.timestamp_millis()),
        end_time: Set(observation.end_time.timestamp_millis()),
        time_to_revocation: Set(observation.time_to_revocation),
        skip_records: Set(observation.skip_records as i64),
        init_value: Set(observation.init_value),
        end_value: Set(observation.end_value),
        multiplier: Set(observation.multiplier),
        ..Default::default()
    }
}

fn row_to_observation(row: survival_cases::Model) -> Result<Observation, StoreError> {
    Ok(Observation {
        day_of_week: narrow(row.day_of_week, "day_of_week", row.id)?,
        hour_of_day: narrow(row.hour_of_day, "hour_of_day", row.id)?,
        init_time: from_millis(row.init_time, "init_time", row.id)?,
        end_time: from_millis(row.end_time, "end_time", row.id)?,
        skip_records: u32::try_from(row.skip_records).map_err(|_| {
            StoreError::InvalidData(format!("case {}: skip_records {}", row.id, row.skip_records))
        })?,
        region: row.region,
        zone: row.zone,
        instance_type: row.instance,
        multiplier: row.multiplier,
        init_value: row.init_value,
        end_value: row.end_value,
        time_to_revocation: row.time_to_revocation,
        censored: row.censored,
    })
}

fn narrow(value: i16, column: &str, id: i64) -> Result<u8, StoreError> {
    u8::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("case {}: {} {}", id, column, value)))
}

fn from_millis(value: i64, column: &str, id: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::InvalidData(format!("case {}: {} {}", id, column, value)))
}
