//! New-pool detection
//!
//! A pool counts as "new" when any one of several weak signals fires. This is
//! an OR of independent heuristics, not a weighted model: false positives are
//! expected and get filtered later by candidate validation against live data.

use crate::config::DetectionConfig;
use crate::domain::PoolSnapshot;
use chrono::{DateTime, Utc};
use std::fmt;

/// Heuristic that flagged a pool as new, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionSignal {
    RecentListing,
    HighApy,
    LowTvlHighApy,
    RewardHeavy,
    TvlSurge,
    Keyword,
}

impl DetectionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSignal::RecentListing => "recent_listing",
            DetectionSignal::HighApy => "high_apy",
            DetectionSignal::LowTvlHighApy => "low_tvl_high_apy",
            DetectionSignal::RewardHeavy => "reward_heavy",
            DetectionSignal::TvlSurge => "tvl_surge",
            DetectionSignal::Keyword => "keyword",
        }
    }
}

impl fmt::Display for DetectionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of classifying one pool
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub signal: Option<DetectionSignal>,
    /// Human-readable reason for the first signal that fired
    pub reason: String,
}

impl Classification {
    fn established() -> Self {
        Self {
            signal: None,
            reason: String::new(),
        }
    }

    fn new_pool(signal: DetectionSignal, detail: String) -> Self {
        Self {
            signal: Some(signal),
            reason: format!("{signal}: {detail}"),
        }
    }

    pub fn is_new(&self) -> bool {
        self.signal.is_some()
    }
}

/// Labels pools as new or established
#[derive(Debug, Clone)]
pub struct Classifier {
    config: DetectionConfig,
    keywords: Vec<String>,
}

impl Classifier {
    pub fn new(config: DetectionConfig) -> Self {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { config, keywords }
    }

    /// Classify a pool. Signals are checked in a fixed order and the first
    /// one that fires becomes the reason.
    pub fn classify(&self, pool: &PoolSnapshot, now: DateTime<Utc>) -> Classification {
        let cfg = &self.config;

        if let Some(age) = pool.age_days(now) {
            if age < cfg.new_pool_age_days {
                return Classification::new_pool(
                    DetectionSignal::RecentListing,
                    format!("listed {age:.1}d ago"),
                );
            }
        }

        if pool.apy > cfg.high_apy_threshold {
            return Classification::new_pool(
                DetectionSignal::HighApy,
                format!("apy {:.2}% > {}%", pool.apy, cfg.high_apy_threshold),
            );
        }

        if pool.tvl_usd < cfg.low_tvl_threshold && pool.apy > cfg.medium_apy_threshold {
            return Classification::new_pool(
                DetectionSignal::LowTvlHighApy,
                format!("tvl ${:.0} with apy {:.2}%", pool.tvl_usd, pool.apy),
            );
        }

        let ratio = pool.reward_ratio();
        if ratio > cfg.high_reward_ratio && pool.apy > cfg.medium_apy_threshold {
            return Classification::new_pool(
                DetectionSignal::RewardHeavy,
                format!("reward ratio {ratio:.2}"),
            );
        }

        let growth = pool.tvl_growth_pct();
        if growth > cfg.tvl_growth_threshold_pct {
            return Classification::new_pool(
                DetectionSignal::TvlSurge,
                format!("tvl +{growth:.1}% in 1d"),
            );
        }

        if let Some(keyword) = self.matching_keyword(pool) {
            return Classification::new_pool(DetectionSignal::Keyword, format!("matched '{keyword}'"));
        }

        Classification::established()
    }

    fn matching_keyword(&self, pool: &PoolSnapshot) -> Option<&str> {
        let project = pool.project.to_lowercase();
        let symbol = pool.symbol.to_lowercase();
        self.keywords
            .iter()
            .find(|k| project.contains(k.as_str()) || symbol.contains(k.as_str()))
            .map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn classifier() -> Classifier {
        Classifier::new(DetectionConfig::default())
    }

    fn established_pool() -> PoolSnapshot {
        PoolSnapshot {
            pool_id: "p".into(),
            symbol: "SOL-USDC".into(),
            project: "raydium-amm".into(),
            apy: 12.0,
            apy_reward: Some(2.0),
            tvl_usd: 5_000_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_established_pool() {
        let c = classifier().classify(&established_pool(), Utc::now());
        assert!(!c.is_new());
        assert!(c.reason.is_empty());
    }

    #[test]
    fn test_recent_listing_wins_over_later_signals() {
        let now = Utc::now();
        let pool = PoolSnapshot {
            first_seen_at: Some(now - Duration::days(2)),
            apy: 400.0,
            ..established_pool()
        };
        let c = classifier().classify(&pool, now);
        assert_eq!(c.signal, Some(DetectionSignal::RecentListing));
        assert!(c.reason.starts_with("recent_listing"));
    }

    #[test]
    fn test_old_listing_does_not_fire() {
        let now = Utc::now();
        let pool = PoolSnapshot {
            first_seen_at: Some(now - Duration::days(30)),
            ..established_pool()
        };
        assert!(!classifier().classify(&pool, now).is_new());
    }

    #[test]
    fn test_high_apy() {
        let pool = PoolSnapshot {
            apy: 200.5,
            ..established_pool()
        };
        assert_eq!(
            classifier().classify(&pool, Utc::now()).signal,
            Some(DetectionSignal::HighApy)
        );
    }

    #[test]
    fn test_low_tvl_requires_medium_apy() {
        let c = classifier();
        let small_quiet = PoolSnapshot {
            tvl_usd: 80_000.0,
            apy: 40.0,
            ..established_pool()
        };
        assert!(!c.classify(&small_quiet, Utc::now()).is_new());

        let small_hot = PoolSnapshot {
            apy: 60.0,
            ..small_quiet
        };
        assert_eq!(
            c.classify(&small_hot, Utc::now()).signal,
            Some(DetectionSignal::LowTvlHighApy)
        );
    }

    #[test]
    fn test_reward_heavy() {
        let pool = PoolSnapshot {
            apy: 90.0,
            apy_reward: Some(81.0),
            ..established_pool()
        };
        assert_eq!(
            classifier().classify(&pool, Utc::now()).signal,
            Some(DetectionSignal::RewardHeavy)
        );
    }

    #[test]
    fn test_tvl_surge() {
        let pool = PoolSnapshot {
            tvl_growth_pct_1d: Some(75.0),
            ..established_pool()
        };
        assert_eq!(
            classifier().classify(&pool, Utc::now()).signal,
            Some(DetectionSignal::TvlSurge)
        );
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let pool = PoolSnapshot {
            project: "Genesis-Farm".into(),
            ..established_pool()
        };
        let c = classifier().classify(&pool, Utc::now());
        assert_eq!(c.signal, Some(DetectionSignal::Keyword));
        assert_eq!(c.reason, "keyword: matched 'genesis'");
    }
}
