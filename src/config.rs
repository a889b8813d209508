//! Runtime and per-commodity configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Process-level configuration, loaded from environment variables with
/// typed defaults, following the template's `Config::from_env()` idiom.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub db_path: String,
    pub scheduler_concurrency: usize,
    pub micro_batch_window: Duration,
    pub sweeper_interval: Duration,
    pub notification_debounce_window: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_backoff_schedule: Vec<Duration>,
    pub outbox_max_attempts: u32,
    pub db_deadline: Duration,
    pub publish_deadline: Duration,
    pub notification_deadline: Duration,
    pub allocation_top_n: usize,
    pub allocation_max_retries: u32,
    pub queue_backpressure_threshold: usize,
    pub commodity_config_path: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self {
            db_path: env_or("TRADECORE_DB_PATH", "tradecore.db"),
            scheduler_concurrency: env_parse("TRADECORE_SCHEDULER_CONCURRENCY", 50),
            micro_batch_window: Duration::from_millis(env_parse(
                "TRADECORE_MICRO_BATCH_MS",
                2_000,
            )),
            sweeper_interval: Duration::from_secs(env_parse("TRADECORE_SWEEPER_SECS", 30)),
            notification_debounce_window: Duration::from_secs(env_parse(
                "TRADECORE_NOTIFY_DEBOUNCE_SECS",
                60,
            )),
            outbox_poll_interval: Duration::from_millis(env_parse(
                "TRADECORE_OUTBOX_POLL_MS",
                500,
            )),
            outbox_backoff_schedule: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(90),
                Duration::from_secs(300),
                Duration::from_secs(600),
            ],
            outbox_max_attempts: 5,
            db_deadline: Duration::from_secs(env_parse("TRADECORE_DB_DEADLINE_SECS", 5)),
            publish_deadline: Duration::from_secs(env_parse("TRADECORE_PUBLISH_DEADLINE_SECS", 3)),
            notification_deadline: Duration::from_secs(env_parse(
                "TRADECORE_NOTIFY_DEADLINE_SECS",
                10,
            )),
            allocation_top_n: env_parse("TRADECORE_ALLOCATION_TOP_N", 5),
            allocation_max_retries: env_parse("TRADECORE_ALLOCATION_MAX_RETRIES", 3),
            queue_backpressure_threshold: env_parse("TRADECORE_QUEUE_BACKPRESSURE", 10_000),
            commodity_config_path: std::env::var("TRADECORE_COMMODITY_CONFIG").ok(),
        }
    }
}

/// Per-commodity scoring weights and thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct CommodityConfig {
    #[serde(default = "default_weight_quality")]
    pub weight_quality: f64,
    #[serde(default = "default_weight_price")]
    pub weight_price: f64,
    #[serde(default = "default_weight_delivery")]
    pub weight_delivery: f64,
    #[serde(default = "default_weight_risk")]
    pub weight_risk: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_km")]
    pub max_km: f64,
    #[serde(default = "default_negotiation_ttl_hours")]
    pub negotiation_ttl_hours: i64,
    #[serde(default = "default_partial_fill_threshold")]
    pub partial_fill_threshold: f64,
    #[serde(default = "default_ai_advisory_confidence")]
    pub ai_advisory_confidence_threshold: f64,
}

fn default_weight_quality() -> f64 {
    0.40
}
fn default_weight_price() -> f64 {
    0.30
}
fn default_weight_delivery() -> f64 {
    0.15
}
fn default_weight_risk() -> f64 {
    0.15
}
fn default_min_score() -> f64 {
    0.6
}
fn default_max_km() -> f64 {
    50.0
}
fn default_negotiation_ttl_hours() -> i64 {
    72
}
fn default_partial_fill_threshold() -> f64 {
    0.0
}
fn default_ai_advisory_confidence() -> f64 {
    0.6
}

impl Default for CommodityConfig {
    fn default() -> Self {
        Self {
            weight_quality: default_weight_quality(),
            weight_price: default_weight_price(),
            weight_delivery: default_weight_delivery(),
            weight_risk: default_weight_risk(),
            min_score: default_min_score(),
            max_km: default_max_km(),
            negotiation_ttl_hours: default_negotiation_ttl_hours(),
            partial_fill_threshold: default_partial_fill_threshold(),
            ai_advisory_confidence_threshold: default_ai_advisory_confidence(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCommodityConfigTable {
    #[serde(flatten)]
    entries: HashMap<String, CommodityConfig>,
}

/// Resolves a commodity id to its `CommodityConfig`, falling back to the
/// `default` entry when the commodity has no specific override.
#[derive(Debug, Clone)]
pub struct CommodityConfigTable {
    entries: HashMap<String, CommodityConfig>,
    default: CommodityConfig,
}

impl CommodityConfigTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            default: CommodityConfig::default(),
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading commodity config {:?}", path.as_ref()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let table: RawCommodityConfigTable =
            toml::from_str(raw).context("parsing commodity config toml")?;
        let mut entries = table.entries;
        let default = entries.remove("default").unwrap_or_default();
        Ok(Self { entries, default })
    }

    pub fn reload_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let reloaded = Self::load_from_path(path)?;
        *self = reloaded;
        Ok(())
    }

    pub fn resolve(&self, commodity_id: &str) -> &CommodityConfig {
        self.entries.get(commodity_id).unwrap_or(&self.default)
    }
}
