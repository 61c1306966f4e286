//! One detection cycle
//!
//! Phase order is fixed: fetch, classify and score, watchlist ingest and
//! prune, exit checks, then validation, selection and investment. The
//! universe is fetched once per cycle and reused by every later phase.

use crate::adapters::PoolDataSource;
use crate::config::AppConfig;
use crate::domain::{DetectionCycle, LogLevel, PoolSnapshot, Position, ScoredPool};
use crate::error::Result;
use crate::persistence::{CycleRecorder, Store};
use crate::strategy::{
    CandidateValidator, Classifier, PortfolioManager, PortfolioReport, Scorer, Selector, Watchlist,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::coordination::ShutdownToken;

/// Last successful fetch, kept for exit checks in degraded cycles
#[derive(Debug, Clone)]
struct UniverseCache {
    fetched_at: DateTime<Utc>,
    pools: Arc<HashMap<String, PoolSnapshot>>,
}

/// What a finished cycle reports back to the scheduler
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: DetectionCycle,
    pub warnings: usize,
    pub errors: usize,
    pub cancelled: bool,
}

pub struct DetectionEngine {
    config: AppConfig,
    source: Arc<dyn PoolDataSource>,
    store: Arc<dyn Store>,
    classifier: Classifier,
    scorer: Scorer,
    selector: Selector,
    validator: CandidateValidator,
    watchlist: Watchlist,
    portfolio: PortfolioManager,
    last_universe: Option<UniverseCache>,
}

impl DetectionEngine {
    /// Load the watchlist and active positions. A store that cannot be read
    /// here is a startup failure.
    pub async fn new(
        config: AppConfig,
        source: Arc<dyn PoolDataSource>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        let scorer = Scorer::new(config.scoring.clone());
        let watchlist = Watchlist::load(config.watchlist.clone(), store.clone()).await?;
        let portfolio =
            PortfolioManager::load(config.portfolio.clone(), scorer.clone(), store.clone()).await?;

        info!(
            watchlist = watchlist.len(),
            active_positions = portfolio.active_positions().len(),
            "Detection engine ready"
        );

        Ok(Self {
            classifier: Classifier::new(config.detection.clone()),
            selector: Selector::new(config.selection.clone()),
            validator: CandidateValidator::new(config.validation.clone()),
            scorer,
            watchlist,
            portfolio,
            config,
            source,
            store,
            last_universe: None,
        })
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn portfolio(&self) -> &PortfolioManager {
        &self.portfolio
    }

    pub async fn run_cycle(&mut self, token: &ShutdownToken) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now(), token).await
    }

    /// Run one cycle as of `now`. Only a failure to open the cycle record is
    /// returned as an error; everything later degrades the cycle instead.
    pub async fn run_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        token: &ShutdownToken,
    ) -> Result<CycleReport> {
        let cycle_id = self.store.begin_cycle(now).await?;
        let span = info_span!("cycle", cycle_id);
        self.run_phases(cycle_id, now, token).instrument(span).await
    }

    async fn run_phases(
        &mut self,
        cycle_id: i64,
        now: DateTime<Utc>,
        token: &ShutdownToken,
    ) -> Result<CycleReport> {
        let mut cycle = DetectionCycle::started(cycle_id, now);
        let mut rec = CycleRecorder::new(cycle_id);
        let cancelled = self.execute(&mut cycle, &mut rec, now, token).await;

        if cancelled {
            let signal = token.signal().map(|s| s.to_string()).unwrap_or_default();
            rec.warn(format!("cycle abandoned on {signal} shutdown"));
            cycle.note_failure("cancelled");
        }

        cycle.active_positions = self.portfolio.active_positions().len();
        cycle.watchlist_size = self.watchlist.len();
        cycle.completed_at = Some(Utc::now().max(now));

        rec.info(format!(
            "cycle complete: pools={} new={} watchlist={} active={} opened={} exited={}",
            cycle.total_pools_found,
            cycle.new_pools_found,
            cycle.watchlist_size,
            cycle.active_positions,
            cycle.positions_opened,
            cycle.positions_exited
        ));

        let warnings = rec.count(LogLevel::Warn);
        let errors = rec.count(LogLevel::Error);

        if let Err(e) = self.store.append_logs(&rec.take()).await {
            error!(cycle_id, "Failed to persist cycle logs: {}", e);
            cycle.note_failure(format!("log persistence failed: {e}"));
        }
        if let Err(e) = self.store.finish_cycle(&cycle).await {
            error!(cycle_id, "Failed to persist cycle summary: {}", e);
        }

        Ok(CycleReport {
            cycle,
            warnings,
            errors,
            cancelled,
        })
    }

    /// Returns true when the cycle stopped early on shutdown
    async fn execute(
        &mut self,
        cycle: &mut DetectionCycle,
        rec: &mut CycleRecorder,
        now: DateTime<Utc>,
        token: &ShutdownToken,
    ) -> bool {
        // Pick up changes made outside the engine (manual exits)
        if let Err(e) = self.portfolio.refresh().await {
            rec.error(format!("failed to reload active positions: {e}"));
            cycle.note_failure("position reload failed");
        }
        if let Err(e) = self.watchlist.reload().await {
            rec.error(format!("failed to reload watchlist: {e}"));
            cycle.note_failure("watchlist reload failed");
        }

        // Phase 1: fetch the universe once
        let fresh = match self.source.fetch_pools().await {
            Ok(pools) => {
                let map: HashMap<String, PoolSnapshot> =
                    pools.into_iter().map(|p| (p.pool_id.clone(), p)).collect();
                let map = Arc::new(map);
                self.last_universe = Some(UniverseCache {
                    fetched_at: now,
                    pools: map.clone(),
                });
                rec.info(format!("fetched {} pools on {}", map.len(), self.config.source.chain));
                Some(map)
            }
            Err(e) => {
                rec.warn(format!("pool fetch failed, skipping investment: {e}"));
                cycle.note_failure(format!("pool fetch failed: {e}"));
                None
            }
        };

        if token.is_cancelled() {
            return true;
        }

        // Phase 2: classify, score, ingest
        let mut scored_by_id: HashMap<String, ScoredPool> = HashMap::new();
        if let Some(universe) = &fresh {
            let scored = self.enrich(universe, now);
            cycle.total_pools_found = scored.len();
            cycle.new_pools_found = scored.iter().filter(|p| p.is_new).count();

            let ingest = self.watchlist.ingest(&scored, now, rec).await;
            if ingest.failed > 0 {
                cycle.note_failure(format!("{} watchlist writes failed", ingest.failed));
            }
            scored_by_id = scored.into_iter().map(|p| (p.pool.pool_id.clone(), p)).collect();
        }
        self.watchlist.prune(now, rec).await;

        if token.is_cancelled() {
            return true;
        }

        // Phase 3: exits, against fresh data or a recent cache
        let exit_universe = match &fresh {
            Some(universe) => universe.clone(),
            None => self.cached_universe(now, rec),
        };
        let exits = self
            .portfolio
            .check_for_exits(&exit_universe, &mut self.watchlist, now, rec)
            .await;
        cycle.positions_exited += exits.exited.len();
        if exits.failed > 0 {
            cycle.note_failure(format!("{} exits could not be recorded", exits.failed));
        }

        if token.is_cancelled() {
            return true;
        }

        // Phase 4: validate, select, invest
        let Some(universe) = fresh else {
            return false;
        };

        let matured = self.watchlist.matured(now);
        if matured.is_empty() {
            rec.info("no matured watchlist entries yet");
            return false;
        }

        let validation = self
            .validator
            .validate(matured.iter().map(|e| e.pool_id.as_str()), &universe);

        let missing: Vec<String> = validation.missing().map(str::to_string).collect();
        for pool_id in missing {
            match self.watchlist.mark_ignored(&pool_id, now).await {
                Ok(()) => rec.info(format!("{pool_id} left the source, no longer watched")),
                Err(e) => rec.error(format!("watchlist update failed for {pool_id}: {e}")),
            }
        }
        for (pool_id, reason) in &validation.rejected {
            debug!(pool_id = %pool_id, reason = %reason, "Candidate failed validation");
        }

        let candidates: Vec<ScoredPool> = validation
            .passed
            .iter()
            .filter_map(|p| scored_by_id.get(&p.pool_id).cloned())
            .collect();
        let selected = self.selector.select(candidates);
        rec.info(format!(
            "{} matured, {} validated, {} selected",
            matured.len(),
            validation.passed.len(),
            selected.len()
        ));

        let invest = self
            .portfolio
            .invest(&selected, &universe, &mut self.watchlist, cycle.id, now, rec)
            .await;
        cycle.positions_opened += invest.opened.len();
        cycle.positions_exited += invest.rebalanced.len();
        if invest.failed > 0 {
            cycle.note_failure(format!("{} position writes failed", invest.failed));
        }

        false
    }

    fn enrich(&self, universe: &HashMap<String, PoolSnapshot>, now: DateTime<Utc>) -> Vec<ScoredPool> {
        universe
            .values()
            .map(|pool| {
                let classification = self.classifier.classify(pool, now);
                self.scorer.score(pool.clone(), classification)
            })
            .collect()
    }

    fn cached_universe(
        &self,
        now: DateTime<Utc>,
        rec: &mut CycleRecorder,
    ) -> Arc<HashMap<String, PoolSnapshot>> {
        let max_age = Duration::minutes(self.config.scheduler.stale_universe_minutes);
        match &self.last_universe {
            Some(cache) if now - cache.fetched_at <= max_age => {
                rec.info(format!(
                    "using cached universe from {} for exit checks",
                    cache.fetched_at.format("%H:%M:%S")
                ));
                cache.pools.clone()
            }
            _ => {
                if !self.portfolio.active_positions().is_empty() {
                    warn!("No usable universe for exit checks; all positions retained");
                }
                Arc::new(HashMap::new())
            }
        }
    }

    /// Close a position on operator request and release its watchlist entry
    pub async fn manual_exit(
        &mut self,
        position_id: i64,
        current_apy: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        self.portfolio
            .manual_exit(position_id, current_apy, &mut self.watchlist, now)
            .await
    }

    /// Current portfolio summary, valued against the last fetched universe
    pub async fn report(&self, now: DateTime<Utc>) -> Result<PortfolioReport> {
        let exited = self.store.all_exited_positions().await?;
        let universe = self
            .last_universe
            .as_ref()
            .map(|c| c.pools.clone())
            .unwrap_or_default();
        Ok(PortfolioReport::build(
            self.portfolio.active_positions(),
            &exited,
            &universe,
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockPoolDataSource;
    use crate::domain::{ExitReason, PositionStatus, WatchlistStatus};
    use crate::error::ScoutError;
    use crate::persistence::MemoryStore;

    fn hot_pool(id: &str, apy: f64) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: id.into(),
            symbol: format!("{id}-USDC"),
            project: "orca-whirlpools".into(),
            chain: "Solana".into(),
            apy,
            apy_base: Some(apy / 2.0),
            apy_reward: Some(apy / 2.0),
            reward_tokens: vec![format!("{id}-TOKEN")],
            tvl_usd: 800_000.0,
            ..Default::default()
        }
    }

    async fn engine_with(
        mock: MockPoolDataSource,
        config: AppConfig,
    ) -> (DetectionEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = DetectionEngine::new(config, Arc::new(mock), store.clone())
            .await
            .unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_new_pool_matures_then_gets_invested() {
        let mut mock = MockPoolDataSource::new();
        mock.expect_fetch_pools()
            .times(2)
            .returning(|| Ok(vec![hot_pool("a", 240.0), hot_pool("quiet", 12.0)]));

        let (mut engine, store) = engine_with(mock, AppConfig::default()).await;
        let token = ShutdownToken::never();
        let t0 = Utc::now();

        let first = engine.run_cycle_at(t0, &token).await.unwrap();
        assert_eq!(first.cycle.total_pools_found, 2);
        assert_eq!(first.cycle.new_pools_found, 1);
        assert_eq!(first.cycle.positions_opened, 0);
        assert_eq!(engine.watchlist().len(), 1);

        let second = engine
            .run_cycle_at(t0 + Duration::minutes(30), &token)
            .await
            .unwrap();
        assert_eq!(second.cycle.positions_opened, 1);
        assert_eq!(
            engine.watchlist().get("a").map(|e| e.status),
            Some(WatchlistStatus::Invested)
        );

        let active = store.active_positions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].cycle_id, Some(second.cycle.id));
        assert!(active[0].detection_reason.starts_with("high_apy"));

        let cycles = store.recent_cycles(10).await.unwrap();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().all(|c| c.completed_at.is_some()));
        assert!(!store.cycle_logs(second.cycle.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_retains_position_past_hold() {
        let mut mock = MockPoolDataSource::new();
        let mut calls = 0;
        mock.expect_fetch_pools().returning(move || {
            calls += 1;
            if calls <= 2 {
                Ok(vec![hot_pool("a", 80.0)])
            } else {
                Err(ScoutError::SourceTimeout { secs: 30 })
            }
        });

        let mut config = AppConfig::default();
        config.detection.high_apy_threshold = 70.0;
        config.scheduler.stale_universe_minutes = 60;
        let (mut engine, store) = engine_with(mock, config).await;
        let token = ShutdownToken::never();
        let t0 = Utc::now();

        engine.run_cycle_at(t0, &token).await.unwrap();
        engine
            .run_cycle_at(t0 + Duration::minutes(30), &token)
            .await
            .unwrap();
        assert_eq!(engine.portfolio().active_positions().len(), 1);

        // hold period elapsed, cache is older than an hour, source is down
        let report = engine
            .run_cycle_at(t0 + Duration::hours(50), &token)
            .await
            .unwrap();

        assert!(report.cycle.is_degraded());
        assert_eq!(report.cycle.positions_exited, 0);
        assert!(report.warnings >= 2);
        let active = store.active_positions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_degraded_cycle_uses_recent_cache_for_exits() {
        let mut mock = MockPoolDataSource::new();
        let mut calls = 0;
        mock.expect_fetch_pools().returning(move || {
            calls += 1;
            match calls {
                1 | 2 => Ok(vec![hot_pool("a", 240.0)]),
                3 => Ok(vec![hot_pool("a", 60.0)]),
                _ => Err(ScoutError::SourceUnavailable("503".into())),
            }
        });

        let (mut engine, store) = engine_with(mock, AppConfig::default()).await;
        let token = ShutdownToken::never();
        let t0 = Utc::now();

        engine.run_cycle_at(t0, &token).await.unwrap();
        engine.run_cycle_at(t0 + Duration::minutes(30), &token).await.unwrap();
        assert_eq!(engine.portfolio().active_positions().len(), 1);

        // 240 -> 60 is a 75% drop; the fresh fetch exits immediately
        let report = engine
            .run_cycle_at(t0 + Duration::minutes(45), &token)
            .await
            .unwrap();
        assert_eq!(report.cycle.positions_exited, 1);

        let exited = store
            .exited_positions(crate::persistence::Page::default())
            .await
            .unwrap();
        assert_eq!(exited[0].exit_reason, Some(ExitReason::ApyDrop));
        assert_eq!(exited[0].exit_apy, Some(60.0));
        // released so the pool can be detected again
        assert!(engine.watchlist().get("a").is_none());

        let degraded = engine
            .run_cycle_at(t0 + Duration::minutes(60), &token)
            .await
            .unwrap();
        assert!(degraded.cycle.is_degraded());
        assert_eq!(degraded.cycle.positions_opened, 0);
    }

    #[tokio::test]
    async fn test_vanished_candidate_is_ignored() {
        let mut mock = MockPoolDataSource::new();
        let mut calls = 0;
        mock.expect_fetch_pools().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![hot_pool("a", 300.0)])
            } else {
                Ok(vec![hot_pool("b", 12.0)])
            }
        });

        let (mut engine, store) = engine_with(mock, AppConfig::default()).await;
        let token = ShutdownToken::never();
        let t0 = Utc::now();

        engine.run_cycle_at(t0, &token).await.unwrap();
        let report = engine
            .run_cycle_at(t0 + Duration::hours(1), &token)
            .await
            .unwrap();

        assert_eq!(report.cycle.positions_opened, 0);
        assert_eq!(
            engine.watchlist().get("a").map(|e| e.status),
            Some(WatchlistStatus::Ignored)
        );
        assert!(store.active_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_investment() {
        let mut mock = MockPoolDataSource::new();
        mock.expect_fetch_pools()
            .returning(|| Ok(vec![hot_pool("a", 240.0)]));

        let (mut engine, store) = engine_with(mock, AppConfig::default()).await;
        let shutdown = crate::coordination::GracefulShutdown::new();
        let token = shutdown.token();
        shutdown.request_shutdown(crate::coordination::ShutdownSignal::Graceful);

        let report = engine.run_cycle_at(Utc::now(), &token).await.unwrap();

        assert!(report.cancelled);
        assert!(engine.watchlist().is_empty());
        let cycles = store.recent_cycles(1).await.unwrap();
        assert_eq!(cycles[0].failure.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_store_outage_is_not_fatal() {
        let mut mock = MockPoolDataSource::new();
        mock.expect_fetch_pools()
            .returning(|| Ok(vec![hot_pool("a", 240.0)]));

        let (mut engine, store) = engine_with(mock, AppConfig::default()).await;
        let token = ShutdownToken::never();
        let t0 = Utc::now();

        engine.run_cycle_at(t0, &token).await.unwrap();
        store.set_fail_writes(true);
        let err = engine.run_cycle_at(t0 + Duration::minutes(30), &token).await;
        assert!(err.unwrap_err().is_persistence());

        store.set_fail_writes(false);
        let report = engine
            .run_cycle_at(t0 + Duration::minutes(45), &token)
            .await
            .unwrap();
        assert_eq!(report.cycle.positions_opened, 1);
    }

    #[tokio::test]
    async fn test_report_counts_every_exit_past_one_page() {
        let store = Arc::new(MemoryStore::new());
        let t0 = Utc::now() - Duration::days(30);
        let candidate = ScoredPool {
            pool: hot_pool("old", 90.0),
            risk_score: 2,
            profit_potential: 0.3,
            is_new: false,
            detection_reason: String::new(),
        };

        for i in 0..600 {
            let mut position = Position::open(&candidate, rust_decimal_macros::dec!(1000), None, t0);
            position.pool_id = format!("old-{i}");
            position.id = Some(store.insert_position(&position).await.unwrap());
            position
                .close(
                    t0 + Duration::hours(1),
                    90.0,
                    ExitReason::TimeExit,
                    rust_decimal_macros::dec!(1),
                )
                .unwrap();
            store.record_exit(&position).await.unwrap();
        }

        let engine = DetectionEngine::new(
            AppConfig::default(),
            Arc::new(MockPoolDataSource::new()),
            store.clone(),
        )
        .await
        .unwrap();
        let report = engine.report(Utc::now()).await.unwrap();

        assert_eq!(report.exited_count, 600);
        assert_eq!(report.realized_pnl, rust_decimal_macros::dec!(600));
        assert_eq!(report.active_count, 0);
    }
}
