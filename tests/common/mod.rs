#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spot_survival::models::observation::{Observation, ObservationQuery};
use spot_survival::models::price::{PricePoint, SeriesKey, TimeRange};
use spot_survival::services::memory_store::InMemoryPriceHistoryStore;
use spot_survival::services::price_source::{
    PriceHistoryPage, PriceHistoryRequest, PriceHistorySource, SourceError, SpotPriceRecord,
};
use spot_survival::services::price_store::{
    AppendOutcome, PriceHistoryStore, ReplaceOutcome, StoreError,
};

/// 2017-09-05 20:00 UTC, a Tuesday (day of week 3)
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 9, 5, 20, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

/// Ascending series from (minutes after t0, price) pairs
pub fn series(key: &SeriesKey, points: &[(i64, Decimal)]) -> Vec<PricePoint> {
    points
        .iter()
        .map(|(minutes, price)| PricePoint::new(key, at(*minutes), *price))
        .collect()
}

/// One provider page, newest first, from (minutes after t0, price) pairs
pub fn page(points: &[(i64, Decimal)]) -> Vec<SpotPriceRecord> {
    let mut records: Vec<SpotPriceRecord> = points
        .iter()
        .map(|(minutes, price)| SpotPriceRecord {
            timestamp: at(*minutes),
            price: *price,
        })
        .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
}

/// Provider double with canned pages, scripted failures and hangs
#[derive(Default)]
pub struct ScriptedSource {
    zones: HashMap<String, Vec<String>>,
    pages: HashMap<String, Vec<Vec<SpotPriceRecord>>>,
    failures: Mutex<HashMap<String, u32>>,
    hanging: HashSet<String>,
    endless: HashSet<String>,
    requests: Mutex<Vec<PriceHistoryRequest>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(mut self, region: &str, zones: &[&str]) -> Self {
        self.zones.insert(
            region.to_string(),
            zones.iter().map(|zone| zone.to_string()).collect(),
        );
        self
    }

    /// Pages in the order the provider returns them (newest page first)
    pub fn with_pages(mut self, instance_type: &str, pages: Vec<Vec<SpotPriceRecord>>) -> Self {
        self.pages.insert(instance_type.to_string(), pages);
        self
    }

    /// Fail the first `times` fetches of an instance type
    pub fn failing(self, instance_type: &str, times: u32) -> Self {
        self.failures.lock().insert(instance_type.to_string(), times);
        self
    }

    pub fn hanging(mut self, instance_type: &str) -> Self {
        self.hanging.insert(instance_type.to_string());
        self
    }

    /// Always hand out another continuation token
    pub fn endless(mut self, instance_type: &str) -> Self {
        self.endless.insert(instance_type.to_string());
        self
    }

    pub fn requests(&self) -> Vec<PriceHistoryRequest> {
        self.requests.lock().clone()
    }

    /// Fetch tasks started for an instance type (first-page requests)
    pub fn attempts(&self, instance_type: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.instance_type == instance_type && r.next_token.is_none())
            .count()
    }
}

#[async_trait]
impl PriceHistorySource for ScriptedSource {
    async fn describe_zones(&self, region: &str) -> Result<Vec<String>, SourceError> {
        self.zones
            .get(region)
            .cloned()
            .ok_or_else(|| SourceError::Other(format!("unknown region {}", region)))
    }

    async fn fetch_page(&self, request: &PriceHistoryRequest) -> Result<PriceHistoryPage, SourceError> {
        self.requests.lock().push(request.clone());

        if self.hanging.contains(&request.instance_type) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }

        if request.next_token.is_none() {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&request.instance_type) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::Other("scripted failure".to_string()));
                }
            }
        }

        let index: usize = request
            .next_token
            .as_deref()
            .and_then(|token| token.strip_prefix("page-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let pages = self.pages.get(&request.instance_type);
        let points = pages
            .and_then(|pages| pages.get(index))
            .cloned()
            .unwrap_or_default();
        let has_more = pages.is_some_and(|pages| index + 1 < pages.len());

        let next_token = if has_more || self.endless.contains(&request.instance_type) {
            Some(format!("page-{}", index + 1))
        } else {
            None
        };

        Ok(PriceHistoryPage { points, next_token })
    }
}

/// In-memory store whose first `failures` price batches fail, and whose
/// case writes fail once `reject_cases` is called
pub struct FlakyStore {
    pub inner: InMemoryPriceHistoryStore,
    failures: AtomicU32,
    rejecting_cases: AtomicBool,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryPriceHistoryStore::new(),
            failures: AtomicU32::new(failures),
            rejecting_cases: AtomicBool::new(false),
        }
    }

    pub fn reject_cases(&self) {
        self.rejecting_cases.store(true, Ordering::SeqCst);
    }

    fn check_cases(&self) -> Result<(), StoreError> {
        if self.rejecting_cases.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("scripted case batch failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceHistoryStore for FlakyStore {
    async fn append_price_points(&self, points: &[PricePoint]) -> Result<AppendOutcome, StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::InvalidData("scripted batch failure".to_string()));
        }
        self.inner.append_price_points(points).await
    }

    async fn latest_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.latest_timestamp(key).await
    }

    async fn read_price_series(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        self.inner.read_price_series(key, range).await
    }

    async fn append_observations(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        self.check_cases()?;
        self.inner.append_observations(observations).await
    }

    async fn read_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>, StoreError> {
        self.inner.read_observations(query).await
    }

    async fn list_series(&self) -> Result<Vec<SeriesKey>, StoreError> {
        self.inner.list_series().await
    }

    async fn clear_observations(&self, key: &SeriesKey) -> Result<u64, StoreError> {
        self.inner.clear_observations(key).await
    }

    async fn replace_observations(
        &self,
        key: &SeriesKey,
        observations: &[Observation],
    ) -> Result<ReplaceOutcome, StoreError> {
        self.check_cases()?;
        self.inner.replace_observations(key, observations).await
    }
}
