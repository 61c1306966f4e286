//! Fixed-interval cycle driver
//!
//! Cycles run strictly one after another on a single task. A tick that fires
//! while a cycle is still running is skipped, not queued, so two cycles can
//! never race on the watchlist or the position slots.

use crate::config::SchedulerConfig;
use crate::coordination::ShutdownToken;
use crate::services::engine::{CycleReport, DetectionEngine};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Totals over the scheduler's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_run: u64,
    pub cycles_degraded: u64,
    pub cycles_failed: u64,
}

pub struct CycleScheduler {
    engine: DetectionEngine,
    interval: Duration,
    run_on_startup: bool,
    stats: SchedulerStats,
}

impl CycleScheduler {
    pub fn new(engine: DetectionEngine, config: &SchedulerConfig) -> Self {
        Self {
            engine,
            interval: config.interval(),
            run_on_startup: config.run_on_startup,
            stats: SchedulerStats::default(),
        }
    }

    /// Override the tick interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    /// Run until `shutdown` fires. Returns the engine so callers can report
    /// on the final state.
    pub async fn run(mut self, shutdown: ShutdownToken) -> (DetectionEngine, SchedulerStats) {
        info!(
            "Cycle scheduler starting (interval={:?}, run_on_startup={})",
            self.interval, self.run_on_startup
        );

        let start = if self.run_on_startup {
            time::Instant::now()
        } else {
            time::Instant::now() + self.interval
        };
        let mut ticker = time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                signal = shutdown.cancelled() => {
                    info!("Cycle scheduler stopping on {} shutdown", signal);
                    break;
                }
                _ = ticker.tick() => {}
            }

            if shutdown.is_cancelled() {
                break;
            }

            let report = self.engine.run_cycle(&shutdown).await;
            self.record(report);
        }

        info!(
            cycles = self.stats.cycles_run,
            degraded = self.stats.cycles_degraded,
            failed = self.stats.cycles_failed,
            "Cycle scheduler stopped"
        );
        (self.engine, self.stats)
    }

    fn record(&mut self, report: crate::error::Result<CycleReport>) {
        self.stats.cycles_run += 1;
        match report {
            Ok(report) if report.cycle.is_degraded() => {
                self.stats.cycles_degraded += 1;
                warn!(
                    cycle_id = report.cycle.id,
                    failure = report.cycle.failure.as_deref().unwrap_or_default(),
                    "Cycle finished degraded"
                );
            }
            Ok(report) => {
                info!(
                    cycle_id = report.cycle.id,
                    opened = report.cycle.positions_opened,
                    exited = report.cycle.positions_exited,
                    warnings = report.warnings,
                    "Cycle finished"
                );
            }
            Err(e) => {
                self.stats.cycles_failed += 1;
                error!("Cycle failed to start: {}", e);
            }
        }
    }
}
