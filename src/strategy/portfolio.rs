//! Simulated portfolio
//!
//! Owns the active positions. Each cycle runs exit checks first, then
//! rebalancing and new investment. Every position mutation is its own store
//! call, and the in-memory set only changes after that call succeeded.

use crate::config::PortfolioConfig;
use crate::domain::{ExitReason, PoolSnapshot, Position, ScoredPool};
use crate::error::{Result, ScoutError};
use crate::persistence::{CycleRecorder, Store};
use crate::strategy::calculations::{calculate_yield, ExitPoint};
use crate::strategy::scoring::Scorer;
use crate::strategy::watchlist::Watchlist;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct ExitSummary {
    pub exited: Vec<Position>,
    /// Positions kept because the pool had no current data
    pub retained_missing: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone)]
pub struct InvestSummary {
    pub opened: Vec<Position>,
    pub rebalanced: Vec<Position>,
    pub skipped_held: usize,
    pub failed: usize,
}

pub struct PortfolioManager {
    config: PortfolioConfig,
    scorer: Scorer,
    store: Arc<dyn Store>,
    active: Vec<Position>,
}

impl PortfolioManager {
    pub async fn load(config: PortfolioConfig, scorer: Scorer, store: Arc<dyn Store>) -> Result<Self> {
        let mut manager = Self {
            config,
            scorer,
            store,
            active: Vec::new(),
        };
        manager.refresh().await?;
        Ok(manager)
    }

    /// Reload active positions from the store
    pub async fn refresh(&mut self) -> Result<()> {
        self.active = self.store.active_positions().await?;
        Ok(())
    }

    pub fn active_positions(&self) -> &[Position] {
        &self.active
    }

    pub fn available_slots(&self) -> usize {
        self.config.max_active_positions.saturating_sub(self.active.len())
    }

    pub fn holds(&self, pool_id: &str) -> bool {
        self.active.iter().any(|p| p.pool_id == pool_id)
    }

    // ==================== Exits ====================

    /// First exit condition that matches, in priority order:
    /// hold time, relative APY drop, emergency risk.
    pub fn evaluate_exit(
        &self,
        position: &Position,
        current: &PoolSnapshot,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        if now - position.entry_time >= self.config.hold_duration() {
            return Some(ExitReason::TimeExit);
        }

        if position.entry_apy > 0.0 {
            let drop = (position.entry_apy - current.apy) / position.entry_apy;
            if drop >= self.config.apy_drop_ratio {
                return Some(ExitReason::ApyDrop);
            }
        }

        if self.scorer.risk_score(current) > self.config.emergency_risk_score {
            return Some(ExitReason::RiskExit);
        }

        None
    }

    /// Evaluate every active position against the current universe. A pool
    /// without current data is never exited on that basis alone.
    pub async fn check_for_exits(
        &mut self,
        universe: &HashMap<String, PoolSnapshot>,
        watchlist: &mut Watchlist,
        now: DateTime<Utc>,
        rec: &mut CycleRecorder,
    ) -> ExitSummary {
        let mut summary = ExitSummary::default();
        let candidates: Vec<Position> = self.active.clone();

        for position in candidates {
            let Some(current) = universe.get(&position.pool_id) else {
                rec.warn(format!(
                    "no current data for {} ({}), position retained",
                    position.pool_id, position.symbol
                ));
                summary.retained_missing += 1;
                continue;
            };

            let Some(reason) = self.evaluate_exit(&position, current, now) else {
                continue;
            };

            match self.exit(&position.pool_id, current.apy, reason, now).await {
                Ok(closed) => {
                    rec.info(format!(
                        "exited {} ({}) reason={} apy {:.2}% -> {:.2}% pnl=${}",
                        closed.pool_id,
                        closed.symbol,
                        reason,
                        closed.entry_apy,
                        current.apy,
                        closed.profit_loss.unwrap_or_default()
                    ));
                    release_watchlist(watchlist, &closed.pool_id, rec).await;
                    summary.exited.push(closed);
                }
                Err(e) => {
                    rec.error(format!("failed to record exit of {}: {e}", position.pool_id));
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    // ==================== Investment ====================

    /// Rebalance while full, then open positions in the free slots.
    ///
    /// `selected` is already validated, diversified and ranked. Pools that
    /// are already held are skipped, so calling this twice with unchanged
    /// state opens nothing the second time.
    pub async fn invest(
        &mut self,
        selected: &[ScoredPool],
        universe: &HashMap<String, PoolSnapshot>,
        watchlist: &mut Watchlist,
        cycle_id: i64,
        now: DateTime<Utc>,
        rec: &mut CycleRecorder,
    ) -> InvestSummary {
        let mut summary = InvestSummary::default();

        if self.available_slots() == 0 {
            self.rebalance(selected, universe, watchlist, now, rec, &mut summary)
                .await;
        }

        for candidate in selected {
            if self.available_slots() == 0 {
                break;
            }
            if self.holds(candidate.pool_id()) {
                summary.skipped_held += 1;
                continue;
            }

            let mut position = Position::open(candidate, self.config.principal_usd, Some(cycle_id), now);
            match self.store.insert_position(&position).await {
                Ok(id) => position.id = Some(id),
                Err(e) => {
                    rec.error(format!("failed to open position in {}: {e}", candidate.pool_id()));
                    summary.failed += 1;
                    continue;
                }
            }
            self.active.push(position.clone());

            if let Err(e) = watchlist.mark_invested(candidate.pool_id(), now).await {
                rec.error(format!("watchlist update failed for {}: {e}", candidate.pool_id()));
            }

            rec.info(format!(
                "opened position {} in {} ({} / {}) apy={:.2}% risk={} reason={}",
                position.id.unwrap_or_default(),
                position.pool_id,
                position.project,
                position.symbol,
                position.entry_apy,
                position.entry_risk_score,
                position.detection_reason
            ));
            summary.opened.push(position);
        }

        summary
    }

    // Greedy: each candidate is compared once against the current weakest
    // holding, never a full reassignment.
    async fn rebalance(
        &mut self,
        selected: &[ScoredPool],
        universe: &HashMap<String, PoolSnapshot>,
        watchlist: &mut Watchlist,
        now: DateTime<Utc>,
        rec: &mut CycleRecorder,
        summary: &mut InvestSummary,
    ) {
        for candidate in selected {
            if self.available_slots() > 0 {
                break;
            }
            if self.holds(candidate.pool_id()) {
                continue;
            }
            let Some(weakest) = self.weakest().cloned() else {
                break;
            };

            let gain = candidate.apy() - weakest.entry_apy;
            if gain <= self.config.rebalance_margin_pct {
                continue;
            }

            let exit_apy = universe
                .get(&weakest.pool_id)
                .map(|p| p.apy)
                .unwrap_or(weakest.entry_apy);

            match self.exit(&weakest.pool_id, exit_apy, ExitReason::Rebalanced, now).await {
                Ok(closed) => {
                    rec.info(format!(
                        "rebalanced out of {} (entry apy {:.2}%) for {} (apy {:.2}%, +{gain:.2} pts)",
                        closed.pool_id,
                        closed.entry_apy,
                        candidate.pool_id(),
                        candidate.apy()
                    ));
                    release_watchlist(watchlist, &closed.pool_id, rec).await;
                    summary.rebalanced.push(closed);
                }
                Err(e) => {
                    rec.error(format!("failed to rebalance out of {}: {e}", weakest.pool_id));
                    summary.failed += 1;
                    break;
                }
            }
        }
    }

    fn weakest(&self) -> Option<&Position> {
        self.active
            .iter()
            .min_by(|a, b| a.entry_apy.total_cmp(&b.entry_apy))
    }

    // ==================== Manual exit ====================

    /// Close one position on request. Without a current APY the entry APY is
    /// used for the yield estimate.
    pub async fn manual_exit(
        &mut self,
        position_id: i64,
        current_apy: Option<f64>,
        watchlist: &mut Watchlist,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let Some(position) = self.active.iter().find(|p| p.id == Some(position_id)).cloned() else {
            return match self.store.get_position(position_id).await? {
                Some(stored) => Err(ScoutError::InvalidStateTransition {
                    from: stored.status.to_string(),
                    to: "exited".to_string(),
                }),
                None => Err(ScoutError::PositionNotFound(position_id)),
            };
        };

        let exit_apy = current_apy.unwrap_or(position.entry_apy);
        let closed = self
            .exit(&position.pool_id, exit_apy, ExitReason::Manual, now)
            .await?;
        info!(
            position_id,
            pool_id = %closed.pool_id,
            pnl = %closed.profit_loss.unwrap_or_default(),
            "manual exit recorded"
        );

        if let Err(e) = watchlist.release(&closed.pool_id).await {
            warn!(pool_id = %closed.pool_id, error = %e, "failed to release watchlist entry");
        }
        Ok(closed)
    }

    /// Close the active position in `pool_id`, persist it, then drop it from
    /// the active set.
    async fn exit(
        &mut self,
        pool_id: &str,
        exit_apy: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let idx = self
            .active
            .iter()
            .position(|p| p.pool_id == pool_id)
            .ok_or_else(|| ScoutError::Internal(format!("no active position in {pool_id}")))?;

        let mut closed = self.active[idx].clone();
        let projection = calculate_yield(
            &closed,
            ExitPoint {
                timestamp: now,
                exit_apy,
            },
        );
        closed.close(now, exit_apy, reason, projection.total_return)?;

        self.store.record_exit(&closed).await?;
        self.active.remove(idx);
        Ok(closed)
    }
}

async fn release_watchlist(watchlist: &mut Watchlist, pool_id: &str, rec: &mut CycleRecorder) {
    if let Err(e) = watchlist.release(pool_id).await {
        rec.warn(format!("failed to release watchlist entry {pool_id}: {e}"));
    }
}

// ==================== Reporting ====================

/// Portfolio summary for operators
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioReport {
    pub generated_at: DateTime<Utc>,
    pub active_count: usize,
    pub capital_deployed: Decimal,
    /// Simulated return of active positions if closed now
    pub unrealized_return: Decimal,
    pub exited_count: usize,
    pub realized_pnl: Decimal,
    /// Share of exited positions with positive P&L
    pub win_rate: Option<f64>,
    pub average_hold_hours: Option<f64>,
    pub exits_by_reason: BTreeMap<String, usize>,
}

impl PortfolioReport {
    /// Active positions are valued at the current APY when the pool is in
    /// `universe`, otherwise at their entry APY.
    pub fn build(
        active: &[Position],
        exited: &[Position],
        universe: &HashMap<String, PoolSnapshot>,
        now: DateTime<Utc>,
    ) -> Self {
        let capital_deployed: Decimal = active.iter().map(|p| p.principal_usd).sum();
        let unrealized_return: Decimal = active
            .iter()
            .map(|p| {
                let exit_apy = universe.get(&p.pool_id).map(|s| s.apy).unwrap_or(p.entry_apy);
                calculate_yield(
                    p,
                    ExitPoint {
                        timestamp: now,
                        exit_apy,
                    },
                )
                .total_return
            })
            .sum();

        let realized_pnl: Decimal = exited.iter().filter_map(|p| p.profit_loss).sum();
        let wins = exited
            .iter()
            .filter(|p| p.profit_loss.is_some_and(|pnl| pnl > Decimal::ZERO))
            .count();

        let (win_rate, average_hold_hours) = if exited.is_empty() {
            (None, None)
        } else {
            let n = exited.len() as f64;
            let hours: f64 = exited.iter().map(|p| p.hours_held(now)).sum();
            (Some(wins as f64 / n), Some(hours / n))
        };

        let mut exits_by_reason = BTreeMap::new();
        for reason in exited.iter().filter_map(|p| p.exit_reason) {
            *exits_by_reason.entry(reason.to_string()).or_insert(0) += 1;
        }

        Self {
            generated_at: now,
            active_count: active.len(),
            capital_deployed,
            unrealized_return,
            exited_count: exited.len(),
            realized_pnl,
            win_rate,
            average_hold_hours,
            exits_by_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoringConfig, WatchlistConfig};
    use crate::domain::{LogLevel, PositionStatus};
    use crate::persistence::MemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn snapshot(id: &str, apy: f64) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: id.into(),
            symbol: format!("{id}-SOL"),
            project: "kamino".into(),
            apy,
            tvl_usd: 750_000.0,
            ..Default::default()
        }
    }

    fn candidate(id: &str, apy: f64) -> ScoredPool {
        ScoredPool {
            pool: snapshot(id, apy),
            risk_score: 3,
            profit_potential: apy / 1000.0,
            is_new: true,
            detection_reason: "high_apy: test".into(),
        }
    }

    fn universe(pools: &[PoolSnapshot]) -> HashMap<String, PoolSnapshot> {
        pools.iter().map(|p| (p.pool_id.clone(), p.clone())).collect()
    }

    struct Fixture {
        manager: PortfolioManager,
        watchlist: Watchlist,
        store: Arc<MemoryStore>,
        rec: CycleRecorder,
    }

    async fn fixture(max_active: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = PortfolioConfig {
            max_active_positions: max_active,
            ..PortfolioConfig::default()
        };
        let manager = PortfolioManager::load(config, Scorer::new(ScoringConfig::default()), store.clone())
            .await
            .unwrap();
        let watchlist = Watchlist::load(WatchlistConfig::default(), store.clone())
            .await
            .unwrap();
        Fixture {
            manager,
            watchlist,
            store,
            rec: CycleRecorder::new(1),
        }
    }

    impl Fixture {
        async fn open(&mut self, picks: &[ScoredPool], now: DateTime<Utc>) -> InvestSummary {
            let universe = universe(&picks.iter().map(|c| c.pool.clone()).collect::<Vec<_>>());
            self.manager
                .invest(picks, &universe, &mut self.watchlist, 1, now, &mut self.rec)
                .await
        }
    }

    #[tokio::test]
    async fn test_exit_priority() {
        let f = fixture(5).await;
        let now = Utc::now();
        let pos = Position::open(&candidate("p", 100.0), dec!(1000), None, now - Duration::hours(50));

        // held past 48h and APY collapsed: time wins
        assert_eq!(
            f.manager.evaluate_exit(&pos, &snapshot("p", 10.0), now),
            Some(ExitReason::TimeExit)
        );

        let recent = Position {
            entry_time: now - Duration::hours(1),
            ..pos.clone()
        };
        assert_eq!(
            f.manager.evaluate_exit(&recent, &snapshot("p", 60.0), now),
            Some(ExitReason::ApyDrop)
        );
        assert_eq!(f.manager.evaluate_exit(&recent, &snapshot("p", 61.0), now), None);

        let risky = PoolSnapshot {
            tvl_usd: 20_000.0,
            predicted_down: true,
            il_risk: true,
            exposure: crate::domain::Exposure::Multi,
            sigma: Some(2.0),
            ..snapshot("p", 95.0)
        };
        // 2 + 1 + 2 + 1 + 1 = 7, not above 8
        assert_eq!(f.manager.evaluate_exit(&recent, &risky, now), None);
        let riskier = PoolSnapshot { apy: 105.0, ..risky };
        assert_eq!(
            f.manager.evaluate_exit(&recent, &riskier, now),
            Some(ExitReason::RiskExit)
        );
    }

    #[tokio::test]
    async fn test_missing_data_retains_position() {
        let mut f = fixture(5).await;
        let t0 = Utc::now();
        f.open(&[candidate("a", 80.0)], t0).await;

        let later = t0 + Duration::hours(72);
        let summary = f
            .manager
            .check_for_exits(&HashMap::new(), &mut f.watchlist, later, &mut f.rec)
            .await;

        assert!(summary.exited.is_empty());
        assert_eq!(summary.retained_missing, 1);
        assert_eq!(f.manager.active_positions().len(), 1);
        assert_eq!(f.rec.count(LogLevel::Warn), 1);
    }

    #[tokio::test]
    async fn test_time_exit_records_yield() {
        let mut f = fixture(5).await;
        let t0 = Utc::now();
        f.open(&[candidate("a", 100.0)], t0).await;

        let later = t0 + Duration::hours(48);
        let summary = f
            .manager
            .check_for_exits(&universe(&[snapshot("a", 100.0)]), &mut f.watchlist, later, &mut f.rec)
            .await;

        assert_eq!(summary.exited.len(), 1);
        let closed = &summary.exited[0];
        assert_eq!(closed.exit_reason, Some(ExitReason::TimeExit));
        assert_eq!(closed.profit_loss, Some(dec!(5.49)));
        assert!(f.store.active_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_portfolio_rebalances_weakest() {
        let mut f = fixture(2).await;
        let t0 = Utc::now();
        f.open(&[candidate("a", 80.0), candidate("b", 120.0)], t0).await;
        assert_eq!(f.manager.available_slots(), 0);

        // 105 is 25 points above the weakest entry APY of 80
        let picks = [candidate("c", 105.0)];
        let summary = f
            .manager
            .invest(&picks, &universe(&[snapshot("a", 78.0), snapshot("c", 105.0)]), &mut f.watchlist, 2, t0 + Duration::hours(1), &mut f.rec)
            .await;

        assert_eq!(summary.rebalanced.len(), 1);
        assert_eq!(summary.rebalanced[0].pool_id, "a");
        assert_eq!(summary.rebalanced[0].exit_reason, Some(ExitReason::Rebalanced));
        assert_eq!(summary.rebalanced[0].exit_apy, Some(78.0));
        assert_eq!(summary.opened.len(), 1);
        assert_eq!(summary.opened[0].pool_id, "c");
        assert!(f.manager.holds("b"));
        assert_eq!(f.manager.active_positions().len(), 2);
    }

    #[tokio::test]
    async fn test_margin_must_be_exceeded() {
        let mut f = fixture(1).await;
        let t0 = Utc::now();
        f.open(&[candidate("a", 80.0)], t0).await;

        let summary = f.open(&[candidate("c", 100.0)], t0).await;
        assert!(summary.rebalanced.is_empty());
        assert!(summary.opened.is_empty());
        assert!(f.manager.holds("a"));
    }

    #[tokio::test]
    async fn test_invest_twice_is_idempotent() {
        let mut f = fixture(5).await;
        let now = Utc::now();
        let picks = [candidate("a", 90.0), candidate("b", 70.0)];

        let first = f.open(&picks, now).await;
        let second = f.open(&picks, now).await;

        assert_eq!(first.opened.len(), 2);
        assert!(second.opened.is_empty());
        assert_eq!(second.skipped_held, 2);
        assert_eq!(f.store.active_positions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_active() {
        let mut f = fixture(3).await;
        let picks: Vec<ScoredPool> = (0..8).map(|i| candidate(&format!("p{i}"), 50.0 + i as f64)).collect();

        let summary = f.open(&picks, Utc::now()).await;

        assert_eq!(summary.opened.len(), 3);
        assert_eq!(f.manager.available_slots(), 0);
        assert_eq!(f.store.active_positions().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_open_is_counted() {
        let mut f = fixture(3).await;
        f.store.set_fail_writes(true);

        let summary = f.open(&[candidate("a", 90.0)], Utc::now()).await;

        assert_eq!(summary.failed, 1);
        assert!(f.manager.active_positions().is_empty());
        assert_eq!(f.rec.count(LogLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_manual_exit() {
        let mut f = fixture(3).await;
        let t0 = Utc::now();
        let opened = f.open(&[candidate("a", 90.0)], t0).await.opened;
        let id = opened[0].id.unwrap();

        let closed = f
            .manager
            .manual_exit(id, None, &mut f.watchlist, t0 + Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Exited);
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert_eq!(closed.exit_apy, Some(90.0));

        let again = f
            .manager
            .manual_exit(id, None, &mut f.watchlist, t0 + Duration::hours(6))
            .await
            .unwrap_err();
        assert!(matches!(again, ScoutError::InvalidStateTransition { .. }));

        let missing = f
            .manager
            .manual_exit(999, None, &mut f.watchlist, t0)
            .await
            .unwrap_err();
        assert!(matches!(missing, ScoutError::PositionNotFound(999)));
    }

    #[test]
    fn test_report() {
        let now = Utc::now();
        let entry = now - Duration::hours(24);
        let active = vec![Position::open(&candidate("a", 100.0), dec!(1000), None, entry)];

        let mut win = Position::open(&candidate("b", 60.0), dec!(1000), None, entry);
        win.close(now, 60.0, ExitReason::TimeExit, dec!(1.64)).unwrap();
        let mut flat = Position::open(&candidate("c", 60.0), dec!(1000), None, entry);
        flat.close(entry, 60.0, ExitReason::Manual, dec!(0)).unwrap();

        let report = PortfolioReport::build(&active, &[win, flat], &HashMap::new(), now);

        assert_eq!(report.active_count, 1);
        assert_eq!(report.capital_deployed, dec!(1000));
        assert!(report.unrealized_return > Decimal::ZERO);
        assert_eq!(report.realized_pnl, dec!(1.64));
        assert_eq!(report.win_rate, Some(0.5));
        assert_eq!(report.exits_by_reason.get("time_exit"), Some(&1));
        assert_eq!(report.exits_by_reason.get("manual"), Some(&1));
    }
}
