//! Layered configuration: compiled defaults, then `swapslot.toml`, then
//! `SWAPSLOT_*` environment variables (later layers win).

#![allow(clippy::result_large_err)]

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::MINUTE_MS;
use crate::resolver::ResolverConfig;
use crate::retry::RetryPolicy;

pub const CONFIG_FILE: &str = "swapslot.toml";
pub const ENV_PREFIX: &str = "SWAPSLOT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the WAL.
    pub data_dir: PathBuf,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
    pub horizon_days: u32,
    pub min_bookable_minutes: u32,
    pub calendar_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    /// Compact the WAL once this many appends have accumulated.
    pub compact_threshold: u64,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff_ms: u64,
    /// IANA name used for users who never set a timezone.
    pub default_timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            horizon_days: 30,
            min_bookable_minutes: 15,
            calendar_timeout_ms: 5_000,
            sweep_interval_secs: 60,
            compact_threshold: 1_000,
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 50,
            default_timezone: "Asia/Kolkata".into(),
        }
    }
}

impl Config {
    /// Load from `./swapslot.toml` (if present) and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Defaults overlaid with the given TOML only; no file or env lookup.
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("swapslot.wal")
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            horizon_days: self.horizon_days,
            min_bookable_ms: i64::from(self.min_bookable_minutes) * MINUTE_MS,
            calendar_timeout: Duration::from_millis(self.calendar_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.storage_retry_attempts,
            initial_backoff: Duration::from_millis(self.storage_retry_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn default_tz(&self) -> Result<Tz, EngineError> {
        self.default_timezone.parse::<Tz>().map_err(|_| {
            EngineError::InvalidInput(format!("unknown timezone {:?}", self.default_timezone))
        })
    }
}
