//! Re-validation of matured candidates against the freshly fetched universe
//!
//! The data provider lags: a pool that looked attractive when it entered the
//! watchlist may have collapsed since. Every candidate is looked up again in
//! the current fetch and the floors are re-applied before any capital is
//! committed. Failing a floor is not an error; the pool is just dropped.

use crate::config::ValidationConfig;
use crate::domain::PoolSnapshot;
use std::collections::HashMap;

/// Why a candidate was dropped
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Not present in the current fetch
    Missing,
    ApyBelowFloor { apy: f64, min: f64 },
    TvlBelowFloor { tvl: f64, min: f64 },
    RewardApyBelowFloor { reward_apy: f64, min: f64 },
    RewardRatioBelowFloor { ratio: f64, min: f64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Missing => write!(f, "not in current fetch"),
            Rejection::ApyBelowFloor { apy, min } => write!(f, "apy {apy:.2}% < {min}%"),
            Rejection::TvlBelowFloor { tvl, min } => write!(f, "tvl ${tvl:.0} < ${min:.0}"),
            Rejection::RewardApyBelowFloor { reward_apy, min } => {
                write!(f, "reward apy {reward_apy:.2}% < {min}%")
            }
            Rejection::RewardRatioBelowFloor { ratio, min } => {
                write!(f, "reward ratio {ratio:.2} < {min}")
            }
        }
    }
}

/// Result of validating a batch of pool ids
#[derive(Debug, Default, Clone)]
pub struct ValidationOutcome {
    /// Current snapshots of the candidates that passed, in input order
    pub passed: Vec<PoolSnapshot>,
    pub rejected: Vec<(String, Rejection)>,
}

impl ValidationOutcome {
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.rejected
            .iter()
            .filter(|(_, r)| *r == Rejection::Missing)
            .map(|(id, _)| id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CandidateValidator {
    config: ValidationConfig,
}

impl CandidateValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, pool: &PoolSnapshot) -> Result<(), Rejection> {
        let cfg = &self.config;

        if pool.apy < cfg.min_apy {
            return Err(Rejection::ApyBelowFloor {
                apy: pool.apy,
                min: cfg.min_apy,
            });
        }
        if pool.tvl_usd < cfg.min_tvl {
            return Err(Rejection::TvlBelowFloor {
                tvl: pool.tvl_usd,
                min: cfg.min_tvl,
            });
        }
        if pool.reward_apy() < cfg.min_reward_apy {
            return Err(Rejection::RewardApyBelowFloor {
                reward_apy: pool.reward_apy(),
                min: cfg.min_reward_apy,
            });
        }
        if pool.reward_ratio() < cfg.min_reward_ratio {
            return Err(Rejection::RewardRatioBelowFloor {
                ratio: pool.reward_ratio(),
                min: cfg.min_reward_ratio,
            });
        }
        Ok(())
    }

    pub fn validate<'a, I>(&self, pool_ids: I, universe: &HashMap<String, PoolSnapshot>) -> ValidationOutcome
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut outcome = ValidationOutcome::default();

        for id in pool_ids {
            let Some(current) = universe.get(id) else {
                outcome.rejected.push((id.to_string(), Rejection::Missing));
                continue;
            };
            match self.check(current) {
                Ok(()) => outcome.passed.push(current.clone()),
                Err(reason) => outcome.rejected.push((id.to_string(), reason)),
            }
        }

        outcome
    }
}
