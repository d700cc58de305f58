// src/lib.rs

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use services::{price_store::PriceHistoryStore, survival::SurvivalService};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PriceHistoryStore>,
    pub survival: SurvivalService,
}

pub mod entities {
    pub mod prelude;
    pub mod spot_price_history;
    pub mod survival_cases;
}

pub mod services {
    pub mod retry;
    pub mod connection_pool;
    pub mod price_store;
    pub mod memory_store;
    pub mod price_source;
    pub mod ingestion;
    pub mod case_generator;
    pub mod kaplan_meier;
    pub mod case_export;
    pub mod survival;
}

pub mod jobs {
    pub mod spot_history_sync;
    pub mod case_generation;
}

pub mod handlers {
    pub mod survival;
}

pub mod config;
pub mod models;

/// HTTP routes of the read API
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::survival::health))
        .route(
            "/api/survival/curve",
            get(handlers::survival::get_survival_curve),
        )
        .route(
            "/api/series/{region}/{zone}/{instance_type}/latest",
            get(handlers::survival::get_latest_price),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
