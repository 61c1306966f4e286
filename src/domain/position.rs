use crate::domain::ScoredPool;
use crate::error::{Result, ScoutError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    /// Terminal; an exited position is never reopened
    Exited,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Exited => "exited",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PositionStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "active" => Ok(PositionStatus::Active),
            "exited" => Ok(PositionStatus::Exited),
            other => Err(format!("unknown position status: {other}")),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Held for the configured duration
    TimeExit,
    /// APY fell too far below the entry APY
    ApyDrop,
    /// Current risk score crossed the emergency threshold
    RiskExit,
    /// Swapped out for a stronger candidate
    Rebalanced,
    /// Closed by an operator
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TimeExit => "time_exit",
            ExitReason::ApyDrop => "apy_drop",
            ExitReason::RiskExit => "risk_exit",
            ExitReason::Rebalanced => "rebalanced",
            ExitReason::Manual => "manual",
        }
    }

    pub fn all() -> [ExitReason; 5] {
        [
            ExitReason::TimeExit,
            ExitReason::ApyDrop,
            ExitReason::RiskExit,
            ExitReason::Rebalanced,
            ExitReason::Manual,
        ]
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ExitReason {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        ExitReason::all()
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown exit reason: {s}"))
    }
}

/// Simulated allocation to one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    /// Cycle that opened the position
    pub cycle_id: Option<i64>,
    pub pool_id: String,
    pub symbol: String,
    pub project: String,
    pub status: PositionStatus,
    pub principal_usd: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_apy: f64,
    pub entry_reward_apy: f64,
    pub entry_tvl: f64,
    pub entry_risk_score: u8,
    pub is_new: bool,
    pub detection_reason: String,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_apy: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    /// Realized simulated profit in USD
    pub profit_loss: Option<Decimal>,
}

impl Position {
    /// Build an active position from a validated candidate
    pub fn open(
        candidate: &ScoredPool,
        principal_usd: Decimal,
        cycle_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            cycle_id,
            pool_id: candidate.pool.pool_id.clone(),
            symbol: candidate.pool.symbol.clone(),
            project: candidate.pool.project.clone(),
            status: PositionStatus::Active,
            principal_usd,
            entry_time: now,
            entry_apy: candidate.pool.apy,
            entry_reward_apy: candidate.pool.reward_apy(),
            entry_tvl: candidate.pool.tvl_usd,
            entry_risk_score: candidate.risk_score,
            is_new: candidate.is_new,
            detection_reason: candidate.detection_reason.clone(),
            exit_time: None,
            exit_apy: None,
            exit_reason: None,
            profit_loss: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Hours held up to `now` (or up to the exit time once exited)
    pub fn hours_held(&self, now: DateTime<Utc>) -> f64 {
        let end = self.exit_time.unwrap_or(now);
        (end - self.entry_time).num_seconds().max(0) as f64 / 3600.0
    }

    /// Move to `Exited`. The exit time is clamped so it never precedes entry.
    pub fn close(
        &mut self,
        exit_time: DateTime<Utc>,
        exit_apy: f64,
        reason: ExitReason,
        profit_loss: Decimal,
    ) -> Result<()> {
        if self.status != PositionStatus::Active {
            return Err(ScoutError::InvalidStateTransition {
                from: self.status.to_string(),
                to: PositionStatus::Exited.to_string(),
            });
        }

        self.status = PositionStatus::Exited;
        self.exit_time = Some(exit_time.max(self.entry_time));
        self.exit_apy = Some(exit_apy);
        self.exit_reason = Some(reason);
        self.profit_loss = Some(profit_loss);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PoolSnapshot;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn candidate() -> ScoredPool {
        ScoredPool {
            pool: PoolSnapshot {
                pool_id: "abc".into(),
                symbol: "JUP-SOL".into(),
                project: "meteora".into(),
                apy: 80.0,
                apy_reward: Some(30.0),
                tvl_usd: 250_000.0,
                ..Default::default()
            },
            risk_score: 3,
            profit_potential: 0.4,
            is_new: true,
            detection_reason: "high_apy".into(),
        }
    }

    #[test]
    fn test_open_copies_entry_metrics() {
        let now = Utc::now();
        let pos = Position::open(&candidate(), dec!(1000), Some(4), now);

        assert!(pos.is_active());
        assert_eq!(pos.entry_apy, 80.0);
        assert_eq!(pos.entry_reward_apy, 30.0);
        assert_eq!(pos.entry_risk_score, 3);
        assert_eq!(pos.cycle_id, Some(4));
        assert!(pos.exit_reason.is_none());
    }

    #[test]
    fn test_close_is_terminal() {
        let now = Utc::now();
        let mut pos = Position::open(&candidate(), dec!(1000), None, now);

        pos.close(now + Duration::hours(2), 60.0, ExitReason::ApyDrop, dec!(1.5))
            .unwrap();
        assert_eq!(pos.status, PositionStatus::Exited);
        assert_eq!(pos.exit_reason, Some(ExitReason::ApyDrop));

        let err = pos
            .close(now + Duration::hours(3), 50.0, ExitReason::Manual, dec!(0))
            .unwrap_err();
        assert!(matches!(err, ScoutError::InvalidStateTransition { .. }));
        assert_eq!(pos.exit_reason, Some(ExitReason::ApyDrop));
    }

    #[test]
    fn test_exit_time_never_precedes_entry() {
        let now = Utc::now();
        let mut pos = Position::open(&candidate(), dec!(1000), None, now);

        pos.close(now - Duration::minutes(5), 80.0, ExitReason::Manual, dec!(0))
            .unwrap();
        assert!(pos.exit_time.unwrap() >= pos.entry_time);
    }

    #[test]
    fn test_exit_reason_round_trips_through_str() {
        for reason in ExitReason::all() {
            assert_eq!(ExitReason::try_from(reason.as_str()), Ok(reason));
        }
        assert!(ExitReason::try_from("stop_loss").is_err());
    }
}
