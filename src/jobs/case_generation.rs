//! Case generation job
//!
//! Walks every stored series, turns it into survival cases and stores and/or
//! exports them. Series are independent units: a bounded number run at once,
//! the CPU-bound generation on the blocking pool. Cases of a series are
//! replaced, not appended to, so reruns do not duplicate them.

use futures_util::{stream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::observation::Observation;
use crate::models::price::{SeriesKey, TimeRange};
use crate::services::case_export::{self, ExportError};
use crate::services::case_generator::{CaseGenerationError, CaseGenerator};
use crate::services::price_store::{PriceHistoryStore, StoreError};

#[derive(Debug, Error)]
pub enum CaseJobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("case generation failed for {key}: {source}")]
    Generation {
        key: SeriesKey,
        #[source]
        source: CaseGenerationError,
    },
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct CaseGenerationOptions {
    /// Replace the stored cases of each series
    pub persist: bool,
    /// Write one case file per series here
    pub export_dir: Option<PathBuf>,
    pub workers: usize,
    /// Only use prices inside this window
    pub range: Option<TimeRange>,
}

impl Default for CaseGenerationOptions {
    fn default() -> Self {
        Self {
            persist: true,
            export_dir: None,
            workers: 4,
            range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOutcome {
    pub key: SeriesKey,
    pub points: usize,
    pub observations: usize,
    pub censored: usize,
    pub persisted: usize,
    pub exported: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseGenerationSummary {
    pub series: usize,
    pub observations: usize,
    pub censored: usize,
    pub persisted: usize,
    pub files: Vec<PathBuf>,
    pub failed: Vec<SeriesKey>,
}

pub struct CaseGenerationJob {
    store: Arc<dyn PriceHistoryStore>,
    generator: CaseGenerator,
    options: CaseGenerationOptions,
}

impl CaseGenerationJob {
    pub fn new(
        store: Arc<dyn PriceHistoryStore>,
        generator: CaseGenerator,
        options: CaseGenerationOptions,
    ) -> Self {
        Self {
            store,
            generator,
            options,
        }
    }

    /// Process every stored series; a failing series is logged and skipped
    pub async fn run(&self) -> Result<CaseGenerationSummary, CaseJobError> {
        let series = self.store.list_series().await?;
        info!(
            series = series.len(),
            workers = self.options.workers,
            persist = self.options.persist,
            "Starting case generation"
        );

        let outcomes: Vec<(SeriesKey, Result<SeriesOutcome, CaseJobError>)> = stream::iter(series)
            .map(|key| async move {
                let result = self.process_series(&key).await;
                (key, result)
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;

        let mut summary = CaseGenerationSummary::default();
        for (key, result) in outcomes {
            match result {
                Ok(outcome) => {
                    summary.series += 1;
                    summary.observations += outcome.observations;
                    summary.censored += outcome.censored;
                    summary.persisted += outcome.persisted;
                    summary.files.extend(outcome.exported);
                }
                Err(e) => {
                    error!(series = %key, "Case generation failed: {}", e);
                    summary.failed.push(key);
                }
            }
        }
        summary.files.sort();
        summary.failed.sort();

        info!(
            series = summary.series,
            failed = summary.failed.len(),
            observations = summary.observations,
            censored = summary.censored,
            persisted = summary.persisted,
            files = summary.files.len(),
            "Case generation finished"
        );
        Ok(summary)
    }

    pub async fn process_series(&self, key: &SeriesKey) -> Result<SeriesOutcome, CaseJobError> {
        let points = self.store.read_price_series(key, self.options.range).await?;
        let point_count = points.len();

        if points.is_empty() {
            debug!(series = %key, "No prices in range, skipping");
            return Ok(SeriesOutcome {
                key: key.clone(),
                points: 0,
                observations: 0,
                censored: 0,
                persisted: 0,
                exported: None,
            });
        }

        let generator = self.generator.clone();
        let groups = tokio::task::spawn_blocking(move || generator.generate(&points))
            .await?
            .map_err(|source| CaseJobError::Generation {
                key: key.clone(),
                source,
            })?;

        let observations: Vec<Observation> = groups
            .into_iter()
            .flat_map(|group| group.observations)
            .collect();
        let censored = observations.iter().filter(|o| o.censored).count();

        let mut persisted = 0;
        if self.options.persist {
            let outcome = self.store.replace_observations(key, &observations).await?;
            if outcome.removed > 0 {
                debug!(series = %key, removed = outcome.removed, "Replaced previous cases");
            }
            persisted = outcome.inserted;
        }

        let exported = match &self.options.export_dir {
            Some(dir) => Some(export(dir.clone(), key.clone(), observations.clone()).await?),
            None => None,
        };

        debug!(
            series = %key,
            points = point_count,
            observations = observations.len(),
            censored,
            "Generated cases"
        );

        Ok(SeriesOutcome {
            key: key.clone(),
            points: point_count,
            observations: observations.len(),
            censored,
            persisted,
            exported,
        })
    }
}

async fn export(
    dir: PathBuf,
    key: SeriesKey,
    observations: Vec<Observation>,
) -> Result<PathBuf, CaseJobError> {
    let path = tokio::task::spawn_blocking(move || {
        case_export::write_cases_file(&dir, &key, &observations)
    })
    .await??;
    Ok(path)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: usize,
    pub series: usize,
    pub observations: usize,
}

/// Load every case file of `dir`, replacing the stored cases of each series found
pub async fn import_case_files(
    store: &dyn PriceHistoryStore,
    dir: &Path,
) -> Result<ImportSummary, CaseJobError> {
    let files = case_export::case_files(dir)?;
    if files.is_empty() {
        warn!(dir = %dir.display(), "No case files found");
        return Ok(ImportSummary::default());
    }

    let mut by_series: BTreeMap<SeriesKey, Vec<Observation>> = BTreeMap::new();
    for path in &files {
        let file = path.clone();
        let observations =
            tokio::task::spawn_blocking(move || case_export::read_cases_file(&file)).await??;
        debug!(file = %path.display(), cases = observations.len(), "Read case file");

        for observation in observations {
            by_series.entry(observation.key()).or_default().push(observation);
        }
    }

    let mut summary = ImportSummary {
        files: files.len(),
        ..Default::default()
    };
    for (key, observations) in by_series {
        let outcome = store.replace_observations(&key, &observations).await?;
        summary.observations += outcome.inserted;
        summary.series += 1;
    }

    info!(
        files = summary.files,
        series = summary.series,
        observations = summary.observations,
        "Imported case files"
    );
    Ok(summary)
}
