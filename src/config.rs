//! Runtime configuration
//!
//! Everything is read from the environment (a `.env` file is loaded by the
//! binaries). Only `DATABASE_URL` is required; the rest fall back to the
//! defaults below.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::price::TimeRange;
use crate::services::connection_pool::PoolConfig;
use crate::services::ingestion::IngestionConfig;
use crate::services::retry::RetryPolicy;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_PRICE_API_BASE_URL: &str = "PRICE_API_BASE_URL";
pub const ENV_PRICE_API_KEY: &str = "PRICE_API_KEY";
pub const ENV_SPOT_REGIONS: &str = "SPOT_REGIONS";
pub const ENV_SPOT_INSTANCE_TYPES: &str = "SPOT_INSTANCE_TYPES";
pub const ENV_SPOT_PRODUCT_DESCRIPTIONS: &str = "SPOT_PRODUCT_DESCRIPTIONS";
pub const ENV_SPOT_WORKER_POOL_SIZE: &str = "SPOT_WORKER_POOL_SIZE";
pub const ENV_SPOT_MAX_ZONE_ATTEMPTS: &str = "SPOT_MAX_ZONE_ATTEMPTS";
pub const ENV_SPOT_ZONE_RETRY_BASE_MS: &str = "SPOT_ZONE_RETRY_BASE_MS";
pub const ENV_SPOT_TASK_TIMEOUT_SECS: &str = "SPOT_TASK_TIMEOUT_SECS";
pub const ENV_SPOT_MAX_PAGES_PER_TASK: &str = "SPOT_MAX_PAGES_PER_TASK";
pub const ENV_SPOT_ZONE_PAUSE_MS: &str = "SPOT_ZONE_PAUSE_MS";
pub const ENV_SPOT_SYNC_INTERVAL_SECS: &str = "SPOT_SYNC_INTERVAL_SECS";
pub const ENV_DB_POOL_CAPACITY: &str = "DB_POOL_CAPACITY";
pub const ENV_DB_POOL_ACQUIRE_TIMEOUT_MS: &str = "DB_POOL_ACQUIRE_TIMEOUT_MS";
pub const ENV_DB_POOL_MAX_ATTEMPTS: &str = "DB_POOL_MAX_ATTEMPTS";
pub const ENV_SURVIVAL_CACHE_TTL_SECS: &str = "SURVIVAL_CACHE_TTL_SECS";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_CASES_EXPORT_DIR: &str = "CASES_EXPORT_DIR";
pub const ENV_CASES_PERSIST: &str = "CASES_PERSIST";
pub const ENV_CASES_WORKERS: &str = "CASES_WORKERS";
pub const ENV_CASES_FROM: &str = "CASES_FROM";
pub const ENV_CASES_TO: &str = "CASES_TO";
pub const ENV_CASES_IMPORT_DIR: &str = "CASES_IMPORT_DIR";

const DEFAULT_REGIONS: &str = "us-east-1,us-west-2";
const DEFAULT_INSTANCE_TYPES: &str = "m3.medium,m4.large,c4.large,r4.large";
const DEFAULT_WORKER_POOL_SIZE: usize = 5;
const DEFAULT_MAX_ZONE_ATTEMPTS: u32 = 5;
const DEFAULT_ZONE_RETRY_BASE_MS: u64 = 2_000;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_PAGES_PER_TASK: usize = 500;
const DEFAULT_ZONE_PAUSE_MS: u64 = 1_000;
/// Six hours
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 21_600;
const DEFAULT_POOL_CAPACITY: usize = 10;
const DEFAULT_POOL_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POOL_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_SURVIVAL_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_CASES_WORKERS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Unset disables the ingestion job
    pub price_api_base_url: Option<String>,
    pub price_api_key: Option<String>,
    pub regions: Vec<String>,
    pub ingestion: IngestionConfig,
    pub sync_interval: Duration,
    pub pool: PoolConfig,
    pub survival_cache_ttl: Duration,
    pub bind_addr: SocketAddr,
    pub cases: CaseJobConfig,
}

/// Settings of the case generation and import binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseJobConfig {
    pub export_dir: Option<PathBuf>,
    pub persist: bool,
    pub workers: usize,
    pub from: Option<String>,
    pub to: Option<String>,
    pub import_dir: Option<PathBuf>,
}

impl CaseJobConfig {
    /// Price window for case generation; `CASES_FROM` and `CASES_TO` go together.
    ///
    /// Accepts RFC 3339 instants or plain dates; a plain `to` date includes the whole day.
    pub fn time_range(&self) -> Result<Option<TimeRange>, ConfigError> {
        match (&self.from, &self.to) {
            (None, None) => Ok(None),
            (Some(from), Some(to)) => {
                let from_at = instant(ENV_CASES_FROM, from, false)?;
                let to_at = instant(ENV_CASES_TO, to, true)?;
                TimeRange::new(from_at, to_at)
                    .map(Some)
                    .ok_or_else(|| invalid(ENV_CASES_FROM, from, "must not be after CASES_TO"))
            }
            (Some(from), None) => Err(invalid(ENV_CASES_FROM, from, "CASES_TO must be set too")),
            (None, Some(to)) => Err(invalid(ENV_CASES_TO, to, "CASES_FROM must be set too")),
        }
    }
}

fn instant(key: &'static str, value: &str, end_of_day: bool) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| invalid(key, value, &e.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    time.map(|time| date.and_time(time).and_utc())
        .ok_or_else(|| invalid(key, value, "invalid time of day"))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = get(ENV_DATABASE_URL).ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;

        let regions = list(get(ENV_SPOT_REGIONS).as_deref().unwrap_or(DEFAULT_REGIONS));
        let instance_types = list(
            get(ENV_SPOT_INSTANCE_TYPES)
                .as_deref()
                .unwrap_or(DEFAULT_INSTANCE_TYPES),
        );
        let product_descriptions = get(ENV_SPOT_PRODUCT_DESCRIPTIONS)
            .map(|value| list(&value))
            .unwrap_or_default();

        let zone_retry = RetryPolicy::new(
            number(&get, ENV_SPOT_MAX_ZONE_ATTEMPTS, DEFAULT_MAX_ZONE_ATTEMPTS)?,
            Duration::from_millis(number(
                &get,
                ENV_SPOT_ZONE_RETRY_BASE_MS,
                DEFAULT_ZONE_RETRY_BASE_MS,
            )?),
        );

        let ingestion = IngestionConfig {
            instance_types,
            product_descriptions,
            worker_pool_size: number(&get, ENV_SPOT_WORKER_POOL_SIZE, DEFAULT_WORKER_POOL_SIZE)?,
            zone_retry,
            task_timeout: Duration::from_secs(number(
                &get,
                ENV_SPOT_TASK_TIMEOUT_SECS,
                DEFAULT_TASK_TIMEOUT_SECS,
            )?),
            max_pages_per_task: number(&get, ENV_SPOT_MAX_PAGES_PER_TASK, DEFAULT_MAX_PAGES_PER_TASK)?,
            zone_pause: Duration::from_millis(number(&get, ENV_SPOT_ZONE_PAUSE_MS, DEFAULT_ZONE_PAUSE_MS)?),
        };

        let pool = PoolConfig {
            capacity: number(&get, ENV_DB_POOL_CAPACITY, DEFAULT_POOL_CAPACITY)?,
            acquire_timeout: Duration::from_millis(number(
                &get,
                ENV_DB_POOL_ACQUIRE_TIMEOUT_MS,
                DEFAULT_POOL_ACQUIRE_TIMEOUT_MS,
            )?),
            retry: RetryPolicy::new(
                number(&get, ENV_DB_POOL_MAX_ATTEMPTS, DEFAULT_POOL_MAX_ATTEMPTS)?,
                Duration::from_millis(100),
            ),
        };
        if pool.capacity == 0 {
            return Err(invalid(ENV_DB_POOL_CAPACITY, "0", "must be at least 1"));
        }

        let bind = get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid(ENV_BIND_ADDR, &bind, &e.to_string()))?;

        let cases = CaseJobConfig {
            export_dir: get(ENV_CASES_EXPORT_DIR).map(PathBuf::from),
            persist: flag(&get, ENV_CASES_PERSIST, true)?,
            workers: number(&get, ENV_CASES_WORKERS, DEFAULT_CASES_WORKERS)?,
            from: get(ENV_CASES_FROM),
            to: get(ENV_CASES_TO),
            import_dir: get(ENV_CASES_IMPORT_DIR).map(PathBuf::from),
        };

        Ok(Self {
            database_url,
            price_api_base_url: get(ENV_PRICE_API_BASE_URL),
            price_api_key: get(ENV_PRICE_API_KEY),
            regions,
            ingestion,
            sync_interval: Duration::from_secs(number(
                &get,
                ENV_SPOT_SYNC_INTERVAL_SECS,
                DEFAULT_SYNC_INTERVAL_SECS,
            )?),
            pool,
            survival_cache_ttl: Duration::from_secs(number(
                &get,
                ENV_SURVIVAL_CACHE_TTL_SECS,
                DEFAULT_SURVIVAL_CACHE_TTL_SECS,
            )?),
            bind_addr,
            cases,
        })
    }
}

/// Comma separated list, blanks dropped
fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn number<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &value, &e.to_string())),
        None => Ok(default),
    }
}

fn flag<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|value| value.trim().to_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(key, &value, "expected true or false")),
        },
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
