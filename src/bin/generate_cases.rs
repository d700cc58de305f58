use dotenvy::dotenv;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spot_survival::config::AppConfig;
use spot_survival::jobs::case_generation::{CaseGenerationJob, CaseGenerationOptions};
use spot_survival::services::case_generator::CaseGenerator;
use spot_survival::services::connection_pool::ConnectionPool;
use spot_survival::services::price_store::SeaOrmPriceHistoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv().ok();

    let config = AppConfig::from_env()?;
    let range = config.cases.time_range()?;

    if !config.cases.persist && config.cases.export_dir.is_none() {
        tracing::warn!("CASES_PERSIST=false and no CASES_EXPORT_DIR - cases are only counted");
    }

    let pool = ConnectionPool::connect(&config.database_url, &config.pool).await?;
    let store = Arc::new(SeaOrmPriceHistoryStore::new(pool.clone()));

    tracing::info!(
        from = ?range.map(|r| r.from),
        to = ?range.map(|r| r.to),
        "Starting case generation..."
    );

    let job = CaseGenerationJob::new(
        store,
        CaseGenerator::default(),
        CaseGenerationOptions {
            persist: config.cases.persist,
            export_dir: config.cases.export_dir.clone(),
            workers: config.cases.workers,
            range,
        },
    );

    let summary = job.run().await?;
    pool.close();

    tracing::info!(
        "Case generation complete: {} series, {} cases ({} censored), {} files, {} failed",
        summary.series,
        summary.observations,
        summary.censored,
        summary.files.len(),
        summary.failed.len()
    );

    if !summary.failed.is_empty() {
        return Err(format!("{} series failed", summary.failed.len()).into());
    }

    Ok(())
}
