use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{DATA_API_BASE, GAMMA_API_BASE, RTDS_WS_URL};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
///
/// Every section is optional; missing values fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub filters: FilterConfig,
    pub lp: LpConfig,
    pub scoring: ScoringConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub alerts: AlertConfig,
    pub stats: StatsConfig,
    pub api: ApiConfig,
}

/// Event stream connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ws_url: String,
    /// Close the connection when nothing was received for this long.
    pub stale_after_secs: u64,
    pub health_check_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Capacity of the connector → processor queue.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: RTDS_WS_URL.to_string(),
            stale_after_secs: 30,
            health_check_interval_secs: 10,
            ping_interval_secs: 5,
            backoff_min_secs: 5,
            backoff_max_secs: 60,
            channel_capacity: 1024,
        }
    }
}

impl StreamConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn backoff_min(&self) -> Duration {
        Duration::from_secs(self.backoff_min_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Call-free filters applied before any enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum notional (size × price) in USD.
    pub min_trade_usd: f64,
    /// When set, only trades priced strictly below this are considered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// Gamma tag ids whose markets are skipped entirely.
    pub excluded_tag_ids: Vec<String>,
    pub exclusion_refresh_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_trade_usd: 500.0,
            max_price: None,
            excluded_tag_ids: Vec::new(),
            exclusion_refresh_secs: 3600,
        }
    }
}

/// Liquidity-provider detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LpConfig {
    /// Both sides must hold more than this (USD) to count as a balanced book.
    pub min_side_value: f64,
    /// Smaller side / larger side must exceed this.
    pub balance_ratio: f64,
}

impl Default for LpConfig {
    fn default() -> Self {
        Self {
            min_side_value: 100.0,
            balance_ratio: 0.5,
        }
    }
}

/// Weights and parameters of the scoring model.
///
/// A signal whose max weight is 0 never fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub alert_threshold: f64,

    pub fresh_wallet_max: f64,
    pub max_fresh_age_days: u32,

    pub longshot_max: f64,
    pub longshot_threshold: f64,

    pub size_anomaly_max: f64,
    pub size_anomaly_multiplier: f64,
    /// Ratio, in multiples of `size_anomaly_multiplier`, at which the signal saturates.
    pub size_anomaly_saturation: f64,
    pub size_anomaly_min_score: f64,
    pub min_history_trades: usize,

    pub timing_max: f64,
    pub timing_window_hours: f64,

    pub concentration_max: f64,
    pub concentration_threshold: f64,

    pub low_diversity_max: f64,
    /// Wallets that traded this many markets or more get no diversity points.
    pub max_markets_traded: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 50.0,
            fresh_wallet_max: 30.0,
            max_fresh_age_days: 45,
            longshot_max: 25.0,
            longshot_threshold: 0.20,
            size_anomaly_max: 25.0,
            size_anomaly_multiplier: 3.0,
            size_anomaly_saturation: 3.0,
            size_anomaly_min_score: 5.0,
            min_history_trades: 3,
            timing_max: 20.0,
            timing_window_hours: 48.0,
            concentration_max: 10.0,
            concentration_threshold: 0.5,
            low_diversity_max: 10.0,
            max_markets_traded: 10,
        }
    }
}

/// TTLs of the enrichment caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub profile_ttl_secs: u64,
    pub positions_ttl_secs: u64,
    pub market_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub traded_ttl_secs: u64,
    /// Upper bound on entries per entity cache.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: 3600,
            positions_ttl_secs: 300,
            market_ttl_secs: 3600,
            history_ttl_secs: 300,
            traded_ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Alert delivery. Without bot credentials alerts are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_bot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
    /// Minimum spacing between two sent messages.
    pub min_interval_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            min_interval_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub data_api_base: String,
    pub gamma_api_base: String,
    pub request_timeout_secs: u64,
    /// Number of recent trades fetched for the size-anomaly baseline.
    pub history_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            data_api_base: DATA_API_BASE.to_string(),
            gamma_api_base: GAMMA_API_BASE.to_string(),
            request_timeout_secs: 10,
            history_limit: 50,
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.alerts.telegram_bot_token = Some(token);
        }
        if let Some(chat) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.is_empty()) {
            self.alerts.telegram_chat_id = Some(chat);
        }
        if let Some(v) = lookup("MIN_TRADE_AMOUNT") {
            self.filters.min_trade_usd = parse_var("MIN_TRADE_AMOUNT", &v)?;
        }
        if let Some(v) = lookup("MAX_ACCOUNT_AGE_DAYS") {
            self.scoring.max_fresh_age_days = parse_var("MAX_ACCOUNT_AGE_DAYS", &v)?;
        }
        if let Some(v) = lookup("ALERT_SCORE_THRESHOLD") {
            self.scoring.alert_threshold = parse_var("ALERT_SCORE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("MAX_MARKETS_TRADED") {
            self.scoring.max_markets_traded = parse_var("MAX_MARKETS_TRADED", &v)?;
        }
        if let Some(v) = lookup("LONGSHOT_THRESHOLD") {
            self.scoring.longshot_threshold = parse_var("LONGSHOT_THRESHOLD", &v)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.stream;
        url::Url::parse(&s.ws_url).with_context(|| format!("invalid stream.ws_url {}", s.ws_url))?;
        if s.stale_after_secs == 0 || s.health_check_interval_secs == 0 || s.ping_interval_secs == 0 {
            bail!("stream intervals must be positive");
        }
        if s.backoff_min_secs == 0 || s.backoff_max_secs < s.backoff_min_secs {
            bail!("stream backoff must satisfy 0 < backoff_min_secs <= backoff_max_secs");
        }
        if s.channel_capacity == 0 {
            bail!("stream.channel_capacity must be positive");
        }

        let f = &self.filters;
        if !(f.min_trade_usd >= 0.0) {
            bail!("filters.min_trade_usd must be non-negative");
        }
        if let Some(max_price) = f.max_price {
            if !(max_price > 0.0 && max_price <= 1.0) {
                bail!("filters.max_price must be in (0, 1]");
            }
        }

        if !(self.lp.min_side_value >= 0.0) {
            bail!("lp.min_side_value must be non-negative");
        }
        if !(self.lp.balance_ratio > 0.0 && self.lp.balance_ratio <= 1.0) {
            bail!("lp.balance_ratio must be in (0, 1]");
        }

        let sc = &self.scoring;
        if !(sc.alert_threshold > 0.0) {
            bail!("scoring.alert_threshold must be positive");
        }
        for (name, weight) in [
            ("fresh_wallet_max", sc.fresh_wallet_max),
            ("longshot_max", sc.longshot_max),
            ("size_anomaly_max", sc.size_anomaly_max),
            ("timing_max", sc.timing_max),
            ("concentration_max", sc.concentration_max),
            ("low_diversity_max", sc.low_diversity_max),
        ] {
            if !(weight >= 0.0) {
                bail!("scoring.{name} must be non-negative");
            }
        }
        if sc.max_fresh_age_days == 0 {
            bail!("scoring.max_fresh_age_days must be positive");
        }
        if !(sc.longshot_threshold > 0.0 && sc.longshot_threshold <= 1.0) {
            bail!("scoring.longshot_threshold must be in (0, 1]");
        }
        if !(sc.size_anomaly_multiplier > 1.0) {
            bail!("scoring.size_anomaly_multiplier must be greater than 1");
        }
        if !(sc.size_anomaly_saturation >= 1.0) {
            bail!("scoring.size_anomaly_saturation must be at least 1");
        }
        if !(sc.size_anomaly_min_score >= 0.0 && sc.size_anomaly_min_score <= sc.size_anomaly_max)
        {
            bail!("scoring.size_anomaly_min_score must be in [0, size_anomaly_max]");
        }
        if !(sc.timing_window_hours > 0.0) {
            bail!("scoring.timing_window_hours must be positive");
        }
        if !(sc.concentration_threshold >= 0.0 && sc.concentration_threshold < 1.0) {
            bail!("scoring.concentration_threshold must be in [0, 1)");
        }

        let c = &self.cache;
        if c.profile_ttl_secs == 0
            || c.positions_ttl_secs == 0
            || c.market_ttl_secs == 0
            || c.history_ttl_secs == 0
            || c.traded_ttl_secs == 0
        {
            bail!("cache TTLs must be positive");
        }
        if c.max_entries == 0 || self.dedup.capacity == 0 {
            bail!("cache.max_entries and dedup.capacity must be positive");
        }
        if self.stats.interval_secs == 0 || f.exclusion_refresh_secs == 0 {
            bail!("stats.interval_secs and filters.exclusion_refresh_secs must be positive");
        }
        if self.alerts.telegram_bot_token.is_some() != self.alerts.telegram_chat_id.is_some() {
            bail!("alerts.telegram_bot_token and alerts.telegram_chat_id must be set together");
        }

        url::Url::parse(&self.api.data_api_base).context("invalid api.data_api_base")?;
        url::Url::parse(&self.api.gamma_api_base).context("invalid api.gamma_api_base")?;
        if self.api.request_timeout_secs == 0 {
            bail!("api.request_timeout_secs must be positive");
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid {name}={value}: {e}"))
}
