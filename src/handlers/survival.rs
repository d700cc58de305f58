//! Survival and series handlers
//!
//! GET /api/survival/curve and GET /api/series/{region}/{zone}/{instance_type}/latest

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::price::SeriesKey;
use crate::models::survival::{
    ErrorResponse, LatestPriceResponse, SurvivalCurveParams, SurvivalCurveResponse,
};
use crate::services::kaplan_meier::survival_horizon;
use crate::services::survival::SurvivalError;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: Some(code.to_string()),
        }),
    )
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/survival/curve
///
/// # Query Parameters
/// - `instance_type`, `day_of_week` (1 = Sunday), `hour_of_day` (0-23): required
/// - `region` and `zone`: optional, together
/// - `threshold`: survival level for the horizon (default: 0.95)
///
/// # Response
/// - 200: Curve, counts and horizon
/// - 400: Missing, malformed or out-of-range parameters (`INVALID_QUERY`)
/// - 422: Not enough cases for an estimate
/// - 500: Database error
pub async fn get_survival_curve(
    State(state): State<AppState>,
    params: Result<Query<SurvivalCurveParams>, QueryRejection>,
) -> Result<Json<SurvivalCurveResponse>, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected survival curve query");
        api_error(StatusCode::BAD_REQUEST, rejection.body_text(), "INVALID_QUERY")
    })?;

    let (query, threshold) = params
        .validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e, "INVALID_QUERY"))?;

    info!(
        instance_type = %query.instance_type,
        day_of_week = query.day_of_week,
        hour_of_day = query.hour_of_day,
        "Fetching survival curve"
    );

    let curve = state.survival.curve(&query).await.map_err(|e| match e {
        SurvivalError::Estimator(inner) => {
            warn!(instance_type = %query.instance_type, "Cannot estimate survival: {}", inner);
            api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                inner.to_string(),
                "INSUFFICIENT_DATA",
            )
        }
        SurvivalError::Store(inner) => {
            error!(error = %inner, "Store error reading cases");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", inner),
                "DATABASE_ERROR",
            )
        }
    })?;

    Ok(Json(SurvivalCurveResponse {
        instance_type: query.instance_type.clone(),
        day_of_week: query.day_of_week,
        hour_of_day: query.hour_of_day,
        region: query.region.clone(),
        zone: query.zone.clone(),
        observations: curve.observations,
        censored: curve.censored,
        threshold,
        horizon_minutes: survival_horizon(&curve.intervals, threshold),
        intervals: curve.intervals.clone(),
    }))
}

/// GET /api/series/{region}/{zone}/{instance_type}/latest
///
/// The newest stored price time of a series; ingestion resumes one minute after it.
pub async fn get_latest_price(
    State(state): State<AppState>,
    Path((region, zone, instance_type)): Path<(String, String, String)>,
) -> Result<Json<LatestPriceResponse>, ApiError> {
    let key = SeriesKey::new(region, zone, instance_type);

    let latest = state.store.latest_timestamp(&key).await.map_err(|e| {
        error!(series = %key, error = %e, "Store error reading latest price");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Database error: {}", e),
            "DATABASE_ERROR",
        )
    })?;

    Ok(Json(LatestPriceResponse {
        series: key.to_string(),
        latest,
    }))
}
