//! Survival curves over stored cases, cached per query

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::kaplan_meier::{self, KaplanMeierError};
use super::price_store::{PriceHistoryStore, StoreError};
use crate::models::observation::ObservationQuery;
use crate::models::survival::SurvivalCurve;

#[derive(Debug, Error)]
pub enum SurvivalError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot estimate survival: {0}")]
    Estimator(#[from] KaplanMeierError),
}

#[derive(Clone)]
pub struct SurvivalService {
    store: Arc<dyn PriceHistoryStore>,
    cache: Arc<Cache<ObservationQuery, Arc<SurvivalCurve>>>,
}

impl SurvivalService {
    pub fn new(store: Arc<dyn PriceHistoryStore>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(ttl)
            .build();

        Self {
            store,
            cache: Arc::new(cache),
        }
    }

    pub async fn curve(&self, query: &ObservationQuery) -> Result<Arc<SurvivalCurve>, SurvivalError> {
        if let Some(cached) = self.cache.get(query).await {
            tracing::debug!(instance_type = %query.instance_type, "Survival curve cache hit");
            return Ok(cached);
        }

        let observations = self.store.read_observations(query).await?;
        let intervals = kaplan_meier::estimate_from_observations(&observations)?;

        let curve = Arc::new(SurvivalCurve {
            query: query.clone(),
            observations: observations.len(),
            censored: observations.iter().filter(|o| o.censored).count(),
            intervals,
        });

        tracing::info!(
            instance_type = %query.instance_type,
            day_of_week = query.day_of_week,
            hour_of_day = query.hour_of_day,
            observations = curve.observations,
            intervals = curve.intervals.len(),
            "Computed survival curve"
        );

        self.cache.insert(query.clone(), curve.clone()).await;
        Ok(curve)
    }

    /// Drop cached curves, e.g. after cases were regenerated
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
