//! In-process store used for dry runs and tests

use crate::domain::{CycleLog, DetectionCycle, Position, PositionStatus, WatchlistEntry};
use crate::error::{Result, ScoutError};
use crate::persistence::{Page, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    cycles: BTreeMap<i64, DetectionCycle>,
    logs: Vec<CycleLog>,
    positions: BTreeMap<i64, Position>,
    watchlist: HashMap<String, WatchlistEntry>,
    next_cycle_id: i64,
    next_position_id: i64,
}

/// `Store` backed by maps behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail like an unreachable database
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ScoutError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<i64> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.next_cycle_id += 1;
        let id = state.next_cycle_id;
        state.cycles.insert(id, DetectionCycle::started(id, started_at));
        Ok(id)
    }

    async fn finish_cycle(&self, cycle: &DetectionCycle) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        match state.cycles.get_mut(&cycle.id) {
            Some(existing) => {
                *existing = cycle.clone();
                Ok(())
            }
            None => Err(ScoutError::Internal(format!("cycle {} not found", cycle.id))),
        }
    }

    async fn append_logs(&self, logs: &[CycleLog]) -> Result<()> {
        self.check_writable()?;
        self.state.write().await.logs.extend_from_slice(logs);
        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<DetectionCycle>> {
        let state = self.state.read().await;
        Ok(state.cycles.values().rev().take(limit).cloned().collect())
    }

    async fn cycle_logs(&self, cycle_id: i64) -> Result<Vec<CycleLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.cycle_id == cycle_id)
            .cloned()
            .collect())
    }

    async fn insert_position(&self, position: &Position) -> Result<i64> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.next_position_id += 1;
        let id = state.next_position_id;
        let mut stored = position.clone();
        stored.id = Some(id);
        state.positions.insert(id, stored);
        Ok(id)
    }

    async fn record_exit(&self, position: &Position) -> Result<()> {
        self.check_writable()?;
        let id = position
            .id
            .ok_or_else(|| ScoutError::Internal("position has no id".to_string()))?;

        let mut state = self.state.write().await;
        let stored = state
            .positions
            .get_mut(&id)
            .ok_or(ScoutError::PositionNotFound(id))?;

        if stored.status != PositionStatus::Active {
            return Err(ScoutError::InvalidStateTransition {
                from: stored.status.to_string(),
                to: PositionStatus::Exited.to_string(),
            });
        }

        stored.status = position.status;
        stored.exit_time = position.exit_time;
        stored.exit_apy = position.exit_apy;
        stored.exit_reason = position.exit_reason;
        stored.profit_loss = position.profit_loss;
        Ok(())
    }

    async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn active_positions(&self) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        let mut active: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|p| (p.entry_time, p.id));
        Ok(active)
    }

    async fn exited_positions(&self, page: Page) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        let mut exited: Vec<Position> = state
            .positions
            .values()
            .filter(|p| !p.is_active())
            .cloned()
            .collect();
        exited.sort_by(|a, b| b.exit_time.cmp(&a.exit_time).then(b.id.cmp(&a.id)));
        Ok(exited
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect())
    }

    async fn watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<WatchlistEntry> = state.watchlist.values().cloned().collect();
        entries.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.pool_id.cmp(&b.pool_id)));
        Ok(entries)
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .watchlist
            .insert(entry.pool_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_watchlist_entries(&self, pool_ids: &[String]) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let removed = pool_ids
            .iter()
            .filter(|id| state.watchlist.remove(id.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}
