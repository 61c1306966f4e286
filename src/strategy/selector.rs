//! Diversified candidate selection

use crate::config::SelectionConfig;
use crate::domain::ScoredPool;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Group key for pools that pay no reward token
pub const NO_REWARD_TOKEN: &str = "none";

#[derive(Debug, Clone)]
pub struct Selector {
    config: SelectionConfig,
}

impl Selector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Risk filter, then at most `max_per_token` per reward-token group, then
    /// at most `max_total` overall. Output is ranked by profit potential.
    pub fn select(&self, candidates: Vec<ScoredPool>) -> Vec<ScoredPool> {
        let mut groups: BTreeMap<String, Vec<ScoredPool>> = BTreeMap::new();

        for pool in candidates {
            if pool.risk_score > self.config.max_risk_score {
                continue;
            }
            let key = token_group(&pool).to_string();
            groups.entry(key).or_default().push(pool);
        }

        let mut selected = Vec::new();
        for (_, mut group) in groups {
            group.sort_by(rank);
            group.truncate(self.config.max_per_token);
            selected.extend(group);
        }

        selected.sort_by(rank);
        selected.truncate(self.config.max_total);
        selected
    }
}

/// Primary reward token, or the `none` bucket
pub fn token_group(pool: &ScoredPool) -> &str {
    pool.pool.primary_reward_token().unwrap_or(NO_REWARD_TOKEN)
}

// Highest profit potential first; pool id keeps the order stable
fn rank(a: &ScoredPool, b: &ScoredPool) -> Ordering {
    b.profit_potential
        .total_cmp(&a.profit_potential)
        .then_with(|| a.pool_id().cmp(b.pool_id()))
}
