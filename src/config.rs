use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub detection: DetectionConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
    pub validation: ValidationConfig,
    pub watchlist: WatchlistConfig,
    pub portfolio: PortfolioConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Yield aggregator endpoint returning the full pool universe
    pub url: String,
    /// Only pools on this chain are considered (case-insensitive)
    pub chain: String,
    /// Per-attempt request timeout
    pub timeout_secs: u64,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Base backoff, doubled on every retry
    pub retry_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "https://yields.llama.fi/pools".to_string(),
            chain: "Solana".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 2000,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Thresholds for the "new pool" heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Pools first seen less than this many days ago are new
    pub new_pool_age_days: f64,
    /// APY (percent) above which a pool is flagged outright
    pub high_apy_threshold: f64,
    /// APY (percent) that must be exceeded for the TVL and reward signals
    pub medium_apy_threshold: f64,
    /// TVL (USD) under which a pool looks freshly launched
    pub low_tvl_threshold: f64,
    /// Reward APY / total APY ratio that looks like launch incentives
    pub high_reward_ratio: f64,
    /// 1-day TVL growth (percent) that looks like a launch inflow
    pub tvl_growth_threshold_pct: f64,
    /// Case-insensitive substrings matched against project and symbol
    pub keywords: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            new_pool_age_days: 7.0,
            high_apy_threshold: 200.0,
            medium_apy_threshold: 50.0,
            low_tvl_threshold: 500_000.0,
            high_reward_ratio: 0.8,
            tvl_growth_threshold_pct: 50.0,
            keywords: ["new", "launch", "genesis", "fresh"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

/// Risk weights thresholds and the profit-potential normalization window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub high_apy_risk_threshold: f64,
    pub low_tvl_risk_threshold: f64,
    /// Reward ratio at or above this adds reward-dependence risk
    pub high_reward_ratio: f64,
    pub volatility_sigma_threshold: f64,
    /// Fixed APY reference range used to normalize APY
    pub stats_apy_min: f64,
    pub stats_apy_max: f64,
    /// Fixed TVL reference ceiling used to normalize TVL on a log scale
    pub stats_tvl_max: f64,
    /// Cap applied to the 24h volume / TVL ratio
    pub volume_ratio_cap: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_apy_risk_threshold: 100.0,
            low_tvl_risk_threshold: 100_000.0,
            high_reward_ratio: 0.8,
            volatility_sigma_threshold: 0.5,
            stats_apy_min: 0.0,
            stats_apy_max: 1000.0,
            stats_tvl_max: 1_000_000_000.0,
            volume_ratio_cap: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub max_risk_score: u8,
    /// Diversification cap per primary reward token
    pub max_per_token: usize,
    pub max_total: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_risk_score: 7,
            max_per_token: 2,
            max_total: 10,
        }
    }
}

/// Floors re-applied to matured candidates against freshly fetched data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_apy: f64,
    pub min_tvl: f64,
    pub min_reward_apy: f64,
    pub min_reward_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_apy: 20.0,
            min_tvl: 50_000.0,
            min_reward_apy: 0.0,
            min_reward_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchlistConfig {
    /// New pools ingested per cycle, highest APY first
    pub top_n: usize,
    /// Maturation delay before an entry may be invested
    pub min_age_minutes: i64,
    /// Watching entries older than this are pruned
    pub max_age_days: i64,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            top_n: 15,
            min_age_minutes: 30,
            max_age_days: 7,
        }
    }
}

impl WatchlistConfig {
    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_age_minutes)
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_age_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub max_active_positions: usize,
    /// Time-based exit after this many hours held
    pub hold_hours: i64,
    /// Relative APY drop from entry that triggers an exit (0.4 = 40%)
    pub apy_drop_ratio: f64,
    /// Current risk score above this forces an exit
    pub emergency_risk_score: u8,
    /// Percentage points a candidate must beat the weakest holding by
    pub rebalance_margin_pct: f64,
    /// Simulated stake per position
    pub principal_usd: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            max_active_positions: 5,
            hold_hours: 48,
            apy_drop_ratio: 0.4,
            emergency_risk_score: 8,
            rebalance_margin_pct: 20.0,
            principal_usd: dec!(1000),
        }
    }
}

impl PortfolioConfig {
    pub fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.hold_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_minutes: u64,
    /// Run a cycle immediately instead of waiting for the first tick
    pub run_on_startup: bool,
    /// Last successful universe is reused for exit checks up to this age
    pub stale_universe_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            run_on_startup: true,
            stale_universe_minutes: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/yieldscout".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SCOUT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SCOUT_PORTFOLIO__HOLD_HOURS, etc.)
            .add_source(
                Environment::with_prefix("SCOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("detection.keywords"),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.source.chain.trim().is_empty() {
            errors.push("source.chain must not be empty".to_string());
        }
        if self.source.timeout_secs == 0 {
            errors.push("source.timeout_secs must be positive".to_string());
        }

        let ratio_ok = |r: f64| r > 0.0 && r <= 1.0;
        if !ratio_ok(self.detection.high_reward_ratio) {
            errors.push("detection.high_reward_ratio must be in (0, 1]".to_string());
        }
        if !ratio_ok(self.scoring.high_reward_ratio) {
            errors.push("scoring.high_reward_ratio must be in (0, 1]".to_string());
        }
        if !ratio_ok(self.portfolio.apy_drop_ratio) {
            errors.push("portfolio.apy_drop_ratio must be in (0, 1]".to_string());
        }

        if self.scoring.stats_apy_max <= self.scoring.stats_apy_min {
            errors.push("scoring.stats_apy_max must exceed stats_apy_min".to_string());
        }
        if self.scoring.stats_tvl_max <= 1.0 {
            errors.push("scoring.stats_tvl_max must be greater than 1".to_string());
        }

        if self.selection.max_risk_score > 10 {
            errors.push("selection.max_risk_score must be at most 10".to_string());
        }
        if self.selection.max_per_token == 0 || self.selection.max_total == 0 {
            errors.push("selection caps must be at least 1".to_string());
        }

        if self.watchlist.min_age() >= self.watchlist.max_age() {
            errors.push("watchlist.min_age_minutes must be shorter than max_age_days".to_string());
        }

        if self.portfolio.max_active_positions == 0 {
            errors.push("portfolio.max_active_positions must be at least 1".to_string());
        }
        if self.portfolio.emergency_risk_score > 10 {
            errors.push("portfolio.emergency_risk_score must be at most 10".to_string());
        }
        if self.portfolio.principal_usd <= Decimal::ZERO {
            errors.push("portfolio.principal_usd must be positive".to_string());
        }
        if self.portfolio.hold_hours <= 0 {
            errors.push("portfolio.hold_hours must be positive".to_string());
        }

        if self.scheduler.interval_minutes == 0 {
            errors.push("scheduler.interval_minutes must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
