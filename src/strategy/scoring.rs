//! Risk and profit-potential scores
//!
//! Both scores are pure functions of one snapshot and the scoring config.

use crate::config::ScoringConfig;
use crate::domain::{Exposure, PoolSnapshot, ScoredPool};
use crate::strategy::classifier::Classification;

pub const MAX_RISK_SCORE: u8 = 10;

const HIGH_APY_WEIGHT: u8 = 3;
const LOW_TVL_WEIGHT: u8 = 2;
const REWARD_DEPENDENCE_WEIGHT: u8 = 2;
const MULTI_EXPOSURE_WEIGHT: u8 = 1;
const PREDICTED_DOWN_WEIGHT: u8 = 2;
const IL_RISK_WEIGHT: u8 = 1;
const VOLATILITY_WEIGHT: u8 = 1;

const APY_WEIGHT: f64 = 0.6;
const TVL_WEIGHT: f64 = 0.3;
const VOLUME_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Additive risk heuristic capped to `0..=10`
    pub fn risk_score(&self, pool: &PoolSnapshot) -> u8 {
        let cfg = &self.config;
        let mut score = 0u8;

        if pool.apy > cfg.high_apy_risk_threshold {
            score += HIGH_APY_WEIGHT;
        }
        if pool.tvl_usd < cfg.low_tvl_risk_threshold {
            score += LOW_TVL_WEIGHT;
        }
        if pool.reward_ratio() >= cfg.high_reward_ratio {
            score += REWARD_DEPENDENCE_WEIGHT;
        }
        if pool.exposure != Exposure::Single {
            score += MULTI_EXPOSURE_WEIGHT;
        }
        if pool.predicted_down {
            score += PREDICTED_DOWN_WEIGHT;
        }
        if pool.il_risk {
            score += IL_RISK_WEIGHT;
        }
        if pool.volatility() > cfg.volatility_sigma_threshold {
            score += VOLATILITY_WEIGHT;
        }

        score.min(MAX_RISK_SCORE)
    }

    /// 0.6·apy_norm + 0.3·tvl_norm + 0.1·min(volume/tvl, cap)
    ///
    /// Normalization uses the fixed reference window from config, so the
    /// result can leave `[0, 1]` for pools outside that window. It is only
    /// used for ranking.
    pub fn profit_potential(&self, pool: &PoolSnapshot) -> f64 {
        let cfg = &self.config;

        let apy_norm = (pool.apy - cfg.stats_apy_min) / (cfg.stats_apy_max - cfg.stats_apy_min);
        let tvl_norm = (pool.tvl_usd.max(0.0) + 1.0).log10() / cfg.stats_tvl_max.log10();
        let volume = pool.volume_to_tvl().min(cfg.volume_ratio_cap);

        APY_WEIGHT * apy_norm + TVL_WEIGHT * tvl_norm + VOLUME_WEIGHT * volume
    }

    pub fn score(&self, pool: PoolSnapshot, classification: Classification) -> ScoredPool {
        ScoredPool {
            risk_score: self.risk_score(&pool),
            profit_potential: self.profit_potential(&pool),
            is_new: classification.is_new(),
            detection_reason: classification.reason,
            pool,
        }
    }
}
