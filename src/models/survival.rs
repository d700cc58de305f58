//! Survival curve models and the request/response shapes of the survival endpoint

use serde::{Deserialize, Serialize};

use super::observation::ObservationQuery;

/// Default survival level used to pick the "safe" running time of a curve
pub const DEFAULT_SURVIVAL_THRESHOLD: f64 = 0.95;

/// One step of a Kaplan-Meier curve, covering `(start, end]` minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalInterval {
    pub start: i64,
    pub end: i64,
    pub number_died: u32,
    pub number_censored: u32,
    /// Survival carried into this interval, before its own deaths are applied
    pub cumulative_survival: f64,
}

impl SurvivalInterval {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            number_died: 0,
            number_censored: 0,
            cumulative_survival: 1.0,
        }
    }
}

/// A computed curve together with what it was computed from
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalCurve {
    pub query: ObservationQuery,
    pub observations: usize,
    pub censored: usize,
    pub intervals: Vec<SurvivalInterval>,
}

/// Query parameters for GET /api/survival/curve
#[derive(Debug, Clone, Deserialize)]
pub struct SurvivalCurveParams {
    pub instance_type: String,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub threshold: Option<f64>,
}

impl SurvivalCurveParams {
    /// Validate the parameters and turn them into a store query
    pub fn validate(&self) -> Result<(ObservationQuery, f64), String> {
        if self.region.is_some() != self.zone.is_some() {
            return Err("region and zone must be given together".to_string());
        }

        let threshold = self.threshold.unwrap_or(DEFAULT_SURVIVAL_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!("threshold must be within [0, 1], got {}", threshold));
        }

        let query = ObservationQuery {
            region: self.region.clone(),
            zone: self.zone.clone(),
            instance_type: self.instance_type.clone(),
            day_of_week: self.day_of_week,
            hour_of_day: self.hour_of_day,
        };
        query.validate()?;

        Ok((query, threshold))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalCurveResponse {
    pub instance_type: String,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub observations: usize,
    pub censored: usize,
    pub threshold: f64,
    /// Minutes a job can run while survival stays at or above `threshold`
    pub horizon_minutes: i64,
    pub intervals: Vec<SurvivalInterval>,
}

/// Response for GET /api/series/{region}/{zone}/{instance_type}/latest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPriceResponse {
    pub series: String,
    pub latest: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SurvivalCurveParams {
        SurvivalCurveParams {
            instance_type: "m4.large".to_string(),
            day_of_week: 3,
            hour_of_day: 20,
            region: None,
            zone: None,
            threshold: None,
        }
    }

    #[test]
    fn test_params_default_threshold() {
        let (query, threshold) = params().validate().unwrap();
        assert_eq!(query.instance_type, "m4.large");
        assert_eq!(threshold, DEFAULT_SURVIVAL_THRESHOLD);
    }

    #[test]
    fn test_params_require_region_with_zone() {
        let mut p = params();
        p.zone = Some("us-west-2a".to_string());
        assert!(p.validate().is_err());

        p.region = Some("us-west-2".to_string());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_reject_threshold_out_of_range() {
        let mut p = params();
        p.threshold = Some(1.5);
        assert!(p.validate().is_err());
    }
}
