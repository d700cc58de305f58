//! External spot price history source
//!
//! The provider API is reached through [`PriceHistorySource`]; results are
//! paginated with a continuation token and come back newest first.
//! [`HttpPriceHistoryClient`] talks JSON to a price-history gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("price API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("{0}")]
    Other(String),
}

/// One page request for a (zone, instance type) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceHistoryRequest {
    pub region: String,
    pub zone: String,
    pub instance_type: String,
    /// Empty means every product
    pub product_descriptions: Vec<String>,
    /// Lower bound; None fetches the full history the provider keeps
    pub start_time: Option<DateTime<Utc>>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPriceRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "spotPrice")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistoryPage {
    /// Newest first
    #[serde(rename = "spotPriceHistory", default)]
    pub points: Vec<SpotPriceRecord>,
    #[serde(default)]
    pub next_token: Option<String>,
}

impl PriceHistoryPage {
    /// The continuation token, treating an empty string as the end
    pub fn continuation(&self) -> Option<&str> {
        self.next_token.as_deref().filter(|token| !token.is_empty())
    }
}

#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    /// Availability zones of a region
    async fn describe_zones(&self, region: &str) -> Result<Vec<String>, SourceError>;

    async fn fetch_page(&self, request: &PriceHistoryRequest) -> Result<PriceHistoryPage, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: Vec<String>,
}

#[derive(Clone)]
pub struct HttpPriceHistoryClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    zones: Arc<Cache<String, Vec<String>>>,
}

impl HttpPriceHistoryClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        let zones = Cache::builder()
            .max_capacity(64)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            zones: Arc::new(zones),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header("accept", "application/json");
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, SourceError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api { status, body });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PriceHistorySource for HttpPriceHistoryClient {
    async fn describe_zones(&self, region: &str) -> Result<Vec<String>, SourceError> {
        if let Some(cached) = self.zones.get(region).await {
            tracing::debug!(region = %region, "Zone cache hit");
            return Ok(cached);
        }

        let url = format!("{}/regions/{}/zones", self.base_url, region);
        let response = self.get(&url).send().await?;
        let data: ZonesResponse = Self::json(response).await?;

        self.zones.insert(region.to_string(), data.zones.clone()).await;
        Ok(data.zones)
    }

    async fn fetch_page(&self, request: &PriceHistoryRequest) -> Result<PriceHistoryPage, SourceError> {
        let url = format!("{}/spot-price-history", self.base_url);

        let mut query: Vec<(&str, String)> = vec![
            ("region", request.region.clone()),
            ("availabilityZone", request.zone.clone()),
            ("instanceType", request.instance_type.clone()),
        ];
        for description in &request.product_descriptions {
            query.push(("productDescription", description.clone()));
        }
        if let Some(start) = request.start_time {
            query.push(("startTime", start.to_rfc3339()));
        }
        if let Some(token) = &request.next_token {
            query.push(("nextToken", token.clone()));
        }

        let response = self.get(&url).query(&query).send().await?;
        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_deserialization() {
        let body = r#"{
            "spotPriceHistory": [
                {"timestamp": "2017-09-05T20:30:00Z", "spotPrice": "0.0321"},
                {"timestamp": "2017-09-05T20:00:00Z", "spotPrice": "0.0300"}
            ],
            "nextToken": "abc"
        }"#;

        let page: PriceHistoryPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.points.len(), 2);
        assert!(page.points[0].timestamp > page.points[1].timestamp);
        assert_eq!(page.points[0].price, Decimal::new(321, 4));
        assert_eq!(page.continuation(), Some("abc"));
    }

    #[test]
    fn test_empty_token_ends_pagination() {
        let page: PriceHistoryPage =
            serde_json::from_str(r#"{"spotPriceHistory": [], "nextToken": ""}"#).unwrap();
        assert_eq!(page.continuation(), None);

        let page: PriceHistoryPage = serde_json::from_str(r#"{}"#).unwrap();
        assert!(page.points.is_empty());
        assert_eq!(page.continuation(), None);
    }
}
