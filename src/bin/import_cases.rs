use dotenvy::dotenv;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spot_survival::config::{AppConfig, ENV_CASES_IMPORT_DIR};
use spot_survival::jobs::case_generation::import_case_files;
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
    let dir = config
        .cases
        .import_dir
        .clone()
        .ok_or_else(|| format!("{} must be set", ENV_CASES_IMPORT_DIR))?;

    let pool = ConnectionPool::connect(&config.database_url, &config.pool).await?;
    let store = SeaOrmPriceHistoryStore::new(pool.clone());

    tracing::info!("Importing case files from {}", dir.display());

    let summary = import_case_files(&store, &dir).await?;
    pool.close();

    tracing::info!(
        "Import complete: {} files, {} series, {} cases",
        summary.files,
        summary.series,
        summary.observations
    );

    Ok(())
}
