//! Ingestion scheduler
//!
//! A zone run fans out one fetch task per instance type onto a bounded set of
//! tokio tasks. Workers report over a channel and the coordinating call owns
//! the per-zone state map. Instance types that did not complete are
//! resubmitted in further rounds, with exponential backoff, until every one is
//! stored or the round budget runs out.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::price_source::{PriceHistoryRequest, PriceHistorySource, SourceError};
use super::price_store::{PriceHistoryStore, StoreError};
use super::retry::RetryPolicy;
use crate::models::price::{PricePoint, SeriesKey};

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub instance_types: Vec<String>,
    /// Empty means every product
    pub product_descriptions: Vec<String>,
    pub worker_pool_size: usize,
    /// Round budget per zone and the backoff between rounds
    pub zone_retry: RetryPolicy,
    pub task_timeout: Duration,
    pub max_pages_per_task: usize,
    /// Pause between zones of a region walk
    pub zone_pause: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            instance_types: Vec::new(),
            product_descriptions: Vec::new(),
            worker_pool_size: 5,
            zone_retry: RetryPolicy::new(5, Duration::from_secs(2)),
            task_timeout: Duration::from_secs(300),
            max_pages_per_task: 500,
            zone_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("fetch did not finish within {0:?}")]
    Timeout(Duration),
    #[error("pagination exceeded {0} pages")]
    TooManyPages(usize),
    #[error("fetch task stopped without reporting")]
    Lost,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("zone {region}/{zone} incomplete after {rounds} rounds: {pending:?}")]
    ZoneIncomplete {
        region: String,
        zone: String,
        rounds: u32,
        pending: Vec<String>,
        report: Box<ZoneRunReport>,
    },
    #[error("could not list zones of {region}: {source}")]
    ZoneDiscovery {
        region: String,
        #[source]
        source: SourceError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Fetching,
    Completed,
    Failed,
}

/// Progress of one instance type within a zone run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProgress {
    pub state: FetchState,
    pub attempts: u32,
    pub inserted: usize,
    pub duplicates: usize,
    pub last_error: Option<String>,
}

impl InstanceProgress {
    fn new() -> Self {
        Self {
            state: FetchState::Pending,
            attempts: 0,
            inserted: 0,
            duplicates: 0,
            last_error: None,
        }
    }
}

/// What a finished fetch task stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages: usize,
    pub points: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

struct TaskOutcome {
    instance_type: String,
    result: Result<FetchSummary, FetchError>,
}

/// Instance type states of one zone run, owned by the coordinator
#[derive(Debug)]
pub struct ZoneJobState {
    region: String,
    zone: String,
    instances: BTreeMap<String, InstanceProgress>,
}

impl ZoneJobState {
    pub fn new(region: &str, zone: &str, instance_types: &[String]) -> Self {
        Self {
            region: region.to_string(),
            zone: zone.to_string(),
            instances: instance_types
                .iter()
                .map(|instance_type| (instance_type.clone(), InstanceProgress::new()))
                .collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.instances
            .values()
            .all(|progress| progress.state == FetchState::Completed)
    }

    pub fn incomplete(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|(_, progress)| progress.state != FetchState::Completed)
            .map(|(instance_type, _)| instance_type.clone())
            .collect()
    }

    fn mark_fetching(&mut self, instance_type: &str) {
        if let Some(progress) = self.instances.get_mut(instance_type) {
            progress.state = FetchState::Fetching;
            progress.attempts += 1;
        }
    }

    fn record(&mut self, outcome: TaskOutcome) {
        let Some(progress) = self.instances.get_mut(&outcome.instance_type) else {
            return;
        };

        match outcome.result {
            Ok(summary) => {
                progress.state = FetchState::Completed;
                progress.inserted += summary.inserted;
                progress.duplicates += summary.duplicates;
                progress.last_error = None;
                info!(
                    region = %self.region,
                    zone = %self.zone,
                    instance_type = %outcome.instance_type,
                    pages = summary.pages,
                    inserted = summary.inserted,
                    duplicates = summary.duplicates,
                    "Instance type completed"
                );
            }
            Err(e) => {
                progress.state = FetchState::Failed;
                progress.last_error = Some(e.to_string());
                warn!(
                    region = %self.region,
                    zone = %self.zone,
                    instance_type = %outcome.instance_type,
                    attempt = progress.attempts,
                    "Instance type failed: {}",
                    e
                );
            }
        }
    }

    /// Tasks that never reported (panicked) count as failed
    fn fail_unreported(&mut self) {
        for progress in self.instances.values_mut() {
            if progress.state == FetchState::Fetching {
                progress.state = FetchState::Failed;
                progress.last_error = Some(FetchError::Lost.to_string());
            }
        }
    }

    fn into_report(self, rounds: u32) -> ZoneRunReport {
        ZoneRunReport {
            region: self.region,
            zone: self.zone,
            rounds,
            instances: self.instances,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRunReport {
    pub region: String,
    pub zone: String,
    pub rounds: u32,
    pub instances: BTreeMap<String, InstanceProgress>,
}

impl ZoneRunReport {
    pub fn is_complete(&self) -> bool {
        self.instances
            .values()
            .all(|progress| progress.state == FetchState::Completed)
    }

    pub fn state(&self, instance_type: &str) -> Option<FetchState> {
        self.instances.get(instance_type).map(|progress| progress.state)
    }

    pub fn attempts(&self, instance_type: &str) -> u32 {
        self.instances
            .get(instance_type)
            .map(|progress| progress.attempts)
            .unwrap_or(0)
    }

    pub fn inserted(&self) -> usize {
        self.instances.values().map(|progress| progress.inserted).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.instances.values().map(|progress| progress.duplicates).sum()
    }
}

/// Outcome of a walk over one or more regions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub zones_completed: usize,
    /// `region/zone` of every zone that ran out of rounds
    pub zones_incomplete: Vec<String>,
    pub regions_failed: Vec<String>,
    pub inserted: usize,
    pub duplicates: usize,
}

impl SyncSummary {
    fn absorb(&mut self, other: SyncSummary) {
        self.zones_completed += other.zones_completed;
        self.zones_incomplete.extend(other.zones_incomplete);
        self.regions_failed.extend(other.regions_failed);
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}

#[derive(Clone)]
pub struct IngestionScheduler {
    source: Arc<dyn PriceHistorySource>,
    store: Arc<dyn PriceHistoryStore>,
    config: IngestionConfig,
}

impl IngestionScheduler {
    pub fn new(
        source: Arc<dyn PriceHistorySource>,
        store: Arc<dyn PriceHistoryStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Fetch every configured instance type of one zone until all are stored
    pub async fn run_zone(&self, region: &str, zone: &str) -> Result<ZoneRunReport, IngestionError> {
        let retry = self.config.zone_retry;
        let mut state = ZoneJobState::new(region, zone, &self.config.instance_types);
        let mut rounds = 0;

        while !state.is_complete() {
            if retry.is_exhausted(rounds) {
                let pending = state.incomplete();
                error!(
                    region = %region,
                    zone = %zone,
                    rounds,
                    "Zone run gave up with {} instance types incomplete",
                    pending.len()
                );
                return Err(IngestionError::ZoneIncomplete {
                    region: region.to_string(),
                    zone: zone.to_string(),
                    rounds,
                    pending,
                    report: Box::new(state.into_report(rounds)),
                });
            }

            if rounds > 0 {
                let delay = retry.delay_for(rounds);
                warn!(
                    region = %region,
                    zone = %zone,
                    round = rounds + 1,
                    ?delay,
                    "Resubmitting {} incomplete instance types",
                    state.incomplete().len()
                );
                tokio::time::sleep(delay).await;
            }

            rounds += 1;
            self.run_round(&mut state).await;
        }

        info!(region = %region, zone = %zone, rounds, "Zone run completed");
        Ok(state.into_report(rounds))
    }

    /// One round: submit every incomplete instance type and wait for the drain
    async fn run_round(&self, state: &mut ZoneJobState) {
        let pending = state.incomplete();
        let permits = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let (tx, mut rx) = mpsc::channel::<TaskOutcome>(pending.len().max(1));
        let mut tasks = JoinSet::new();

        for instance_type in pending {
            state.mark_fetching(&instance_type);

            let tx = tx.clone();
            let permits = permits.clone();
            let source = self.source.clone();
            let store = self.store.clone();
            let key = SeriesKey::new(&state.region, &state.zone, &instance_type);
            let product_descriptions = self.config.product_descriptions.clone();
            let max_pages = self.config.max_pages_per_task;
            let task_timeout = self.config.task_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let fetch = fetch_instance(
                    source.as_ref(),
                    store.as_ref(),
                    &key,
                    product_descriptions,
                    max_pages,
                );
                let result = match tokio::time::timeout(task_timeout, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(task_timeout)),
                };

                // The coordinator keeps the receiver until every sender is gone
                let _ = tx.send(TaskOutcome { instance_type, result }).await;
            });
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            state.record(outcome);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(region = %state.region, zone = %state.zone, "Fetch task panicked: {}", e);
            }
        }

        state.fail_unreported();
    }

    /// Run every zone of a region, one after another
    pub async fn run_region(&self, region: &str) -> Result<SyncSummary, IngestionError> {
        let zones = self
            .source
            .describe_zones(region)
            .await
            .map_err(|source| IngestionError::ZoneDiscovery {
                region: region.to_string(),
                source,
            })?;

        info!(region = %region, zones = zones.len(), "Starting region walk");

        let mut summary = SyncSummary::default();
        for (index, zone) in zones.iter().enumerate() {
            if index > 0 && !self.config.zone_pause.is_zero() {
                tokio::time::sleep(self.config.zone_pause).await;
            }

            match self.run_zone(region, zone).await {
                Ok(report) => {
                    summary.zones_completed += 1;
                    summary.inserted += report.inserted();
                    summary.duplicates += report.duplicates();
                }
                Err(IngestionError::ZoneIncomplete { report, .. }) => {
                    summary.inserted += report.inserted();
                    summary.duplicates += report.duplicates();
                    summary.zones_incomplete.push(format!("{}/{}", region, zone));
                }
                Err(e) => {
                    error!(region = %region, zone = %zone, "Zone run failed: {}", e);
                    summary.zones_incomplete.push(format!("{}/{}", region, zone));
                }
            }
        }

        Ok(summary)
    }

    /// Walk all regions; failures are summarized, never abort the walk
    pub async fn run(&self, regions: &[String]) -> SyncSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("spot_history_sync", %run_id);

        async {
            let started = Utc::now();
            let mut summary = SyncSummary::default();

            for region in regions {
                match self.run_region(region).await {
                    Ok(region_summary) => summary.absorb(region_summary),
                    Err(e) => {
                        error!(region = %region, "Region walk failed: {}", e);
                        summary.regions_failed.push(region.clone());
                    }
                }
            }

            info!(
                zones_completed = summary.zones_completed,
                zones_incomplete = summary.zones_incomplete.len(),
                regions_failed = summary.regions_failed.len(),
                inserted = summary.inserted,
                duplicates = summary.duplicates,
                elapsed_secs = (Utc::now() - started).num_seconds(),
                "Spot history sync finished"
            );
            summary
        }
        .instrument(span)
        .await
    }
}

/// Fetch the new history of one series and store it oldest first
async fn fetch_instance(
    source: &dyn PriceHistorySource,
    store: &dyn PriceHistoryStore,
    key: &SeriesKey,
    product_descriptions: Vec<String>,
    max_pages: usize,
) -> Result<FetchSummary, FetchError> {
    let start_time = resume_from(store.latest_timestamp(key).await?);

    debug!(series = %key, ?start_time, "Fetching price history");

    let mut request = PriceHistoryRequest {
        region: key.region.clone(),
        zone: key.zone.clone(),
        instance_type: key.instance_type.clone(),
        product_descriptions,
        start_time,
        next_token: None,
    };

    let mut records = Vec::new();
    let mut pages = 0;
    loop {
        if pages >= max_pages {
            return Err(FetchError::TooManyPages(max_pages));
        }

        let page = source.fetch_page(&request).await?;
        pages += 1;

        let next_token = page.continuation().map(str::to_owned);
        records.extend(page.points);

        match next_token {
            Some(token) => request.next_token = Some(token),
            None => break,
        }
    }

    // Pages arrive newest first
    records.reverse();

    let points: Vec<PricePoint> = records
        .into_iter()
        .map(|record| PricePoint::new(key, record.timestamp, record.price))
        .collect();

    let outcome = store.append_price_points(&points).await?;

    Ok(FetchSummary {
        pages,
        points: points.len(),
        inserted: outcome.inserted,
        duplicates: outcome.duplicates,
    })
}

/// Lower bound for an incremental fetch: one minute past the newest stored point
pub fn resume_from(latest: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    latest.map(|timestamp| timestamp + ChronoDuration::minutes(1))
}
