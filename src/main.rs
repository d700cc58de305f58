use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spot_survival::config::AppConfig;
use spot_survival::jobs::spot_history_sync::start_spot_history_sync_job;
use spot_survival::services::connection_pool::ConnectionPool;
use spot_survival::services::ingestion::IngestionScheduler;
use spot_survival::services::price_source::HttpPriceHistoryClient;
use spot_survival::services::price_store::{PriceHistoryStore, SeaOrmPriceHistoryStore};
use spot_survival::services::survival::SurvivalService;
use spot_survival::{router, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,spot_survival=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().expect("Invalid configuration");

    // Connect to database
    let pool = ConnectionPool::connect(&config.database_url, &config.pool)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    {
        let db = pool.acquire().await.expect("Failed to acquire connection");
        migration::Migrator::up(&*db, None)
            .await
            .expect("Failed to run migrations");
    }

    let store: Arc<dyn PriceHistoryStore> = Arc::new(SeaOrmPriceHistoryStore::new(pool.clone()));
    let survival = SurvivalService::new(store.clone(), config.survival_cache_ttl);

    // Background ingestion, only with a price API configured
    let sync_job = match &config.price_api_base_url {
        Some(base_url) => {
            let client = HttpPriceHistoryClient::new(
                base_url.clone(),
                config.price_api_key.clone(),
                Duration::from_secs(60),
            )
            .expect("Failed to build price API client");

            let scheduler =
                IngestionScheduler::new(Arc::new(client), store.clone(), config.ingestion.clone());
            Some(start_spot_history_sync_job(
                scheduler,
                config.regions.clone(),
                config.sync_interval,
            ))
        }
        None => {
            tracing::warn!("PRICE_API_BASE_URL not set - spot history sync disabled");
            None
        }
    };

    let app = router(AppState { store, survival });

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    if let Some(job) = sync_job {
        job.abort();
    }
    pool.close();
}
