use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset exposure of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    /// Single-asset staking or lending
    #[default]
    Single,
    /// Multi-asset LP position (impermanent loss applies)
    Multi,
}

impl Exposure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exposure::Single => "single",
            Exposure::Multi => "multi",
        }
    }
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One pool as reported by the data source in the current fetch.
///
/// Optional metrics are kept as `Option` so that "not reported" stays
/// distinguishable from zero; the accessor methods map a missing value to its
/// neutral default (0 for rates and ratios, `false` for risk flags).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub symbol: String,
    pub project: String,
    pub chain: String,
    /// Total APY in percent
    pub apy: f64,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,
    pub reward_tokens: Vec<String>,
    pub tvl_usd: f64,
    pub volume_usd_1d: Option<f64>,
    pub tvl_growth_pct_1d: Option<f64>,
    /// APY volatility
    pub sigma: Option<f64>,
    pub il_risk: bool,
    pub predicted_down: bool,
    pub exposure: Exposure,
    /// When the source first listed the pool, if it reports it
    pub first_seen_at: Option<DateTime<Utc>>,
}

impl PoolSnapshot {
    pub fn reward_apy(&self) -> f64 {
        self.apy_reward.unwrap_or(0.0)
    }

    /// Share of the total APY paid in incentive tokens
    pub fn reward_ratio(&self) -> f64 {
        if self.apy <= 0.0 {
            return 0.0;
        }
        self.reward_apy() / self.apy
    }

    pub fn tvl_growth_pct(&self) -> f64 {
        self.tvl_growth_pct_1d.unwrap_or(0.0)
    }

    pub fn volatility(&self) -> f64 {
        self.sigma.unwrap_or(0.0)
    }

    pub fn volume_usd(&self) -> f64 {
        self.volume_usd_1d.unwrap_or(0.0)
    }

    /// 24h volume relative to TVL, with TVL floored at 1 USD
    pub fn volume_to_tvl(&self) -> f64 {
        self.volume_usd() / self.tvl_usd.max(1.0)
    }

    /// First reward token, used as the diversification key
    pub fn primary_reward_token(&self) -> Option<&str> {
        self.reward_tokens
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }

    /// Days since the source first listed the pool
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<f64> {
        self.first_seen_at
            .map(|seen| (now - seen).num_seconds().max(0) as f64 / 86_400.0)
    }
}

/// A pool enriched with this cycle's classification and scores.
///
/// Never cached across cycles: both scores are recomputed from the latest
/// snapshot every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPool {
    pub pool: PoolSnapshot,
    /// Additive risk heuristic, 0..=10
    pub risk_score: u8,
    /// Relative ranking score, roughly 0..1 but not clamped
    pub profit_potential: f64,
    pub is_new: bool,
    /// First detection signal that fired, empty when not new
    pub detection_reason: String,
}

impl ScoredPool {
    pub fn pool_id(&self) -> &str {
        &self.pool.pool_id
    }

    pub fn apy(&self) -> f64 {
        self.pool.apy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_missing_metrics_are_neutral() {
        let pool = PoolSnapshot {
            pool_id: "p1".into(),
            apy: 42.0,
            tvl_usd: 0.0,
            ..Default::default()
        };

        assert_eq!(pool.reward_apy(), 0.0);
        assert_eq!(pool.reward_ratio(), 0.0);
        assert_eq!(pool.volatility(), 0.0);
        assert_eq!(pool.volume_to_tvl(), 0.0);
        assert_eq!(pool.exposure, Exposure::Single);
        assert!(pool.age_days(Utc::now()).is_none());
        assert!(pool.primary_reward_token().is_none());
    }

    #[test]
    fn test_reward_ratio_and_primary_token() {
        let pool = PoolSnapshot {
            apy: 250.0,
            apy_reward: Some(200.0),
            reward_tokens: vec!["  ".into(), "RAY".into(), "ORCA".into()],
            ..Default::default()
        };

        assert_eq!(pool.reward_ratio(), 0.8);
        assert_eq!(pool.primary_reward_token(), Some("RAY"));
    }

    #[test]
    fn test_age_days() {
        let now = Utc::now();
        let pool = PoolSnapshot {
            first_seen_at: Some(now - Duration::hours(36)),
            ..Default::default()
        };
        assert_eq!(pool.age_days(now), Some(1.5));
    }
}
