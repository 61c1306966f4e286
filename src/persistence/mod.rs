//! Persistence layer
//!
//! The engine only talks to storage through the narrow [`Store`] trait, one
//! durable unit of work per call, so a crash between two calls never leaves a
//! half-written position or watchlist entry behind.
//!
//! - [`MemoryStore`] keeps everything in process (dry runs and tests)
//! - `adapters::PostgresStore` is the relational implementation
//! - [`CycleRecorder`] buffers the structured per-cycle log entries

pub mod memory;
pub mod recorder;

pub use memory::MemoryStore;
pub use recorder::CycleRecorder;

use crate::domain::{CycleLog, DetectionCycle, Position, WatchlistEntry};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Upper bound on rows returned by one list query
pub const MAX_PER_PAGE: u32 = 500;

/// 1-based page selector for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.per_page as usize
    }

    pub fn limit(&self) -> usize {
        self.per_page as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// Storage for cycles, logs, positions and the watchlist
#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Cycles ====================

    /// Insert a new cycle row and return its monotonic id
    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<i64>;

    /// Attach the final summary counters to a cycle
    async fn finish_cycle(&self, cycle: &DetectionCycle) -> Result<()>;

    async fn append_logs(&self, logs: &[CycleLog]) -> Result<()>;

    /// Most recent cycles first
    async fn recent_cycles(&self, limit: usize) -> Result<Vec<DetectionCycle>>;

    async fn cycle_logs(&self, cycle_id: i64) -> Result<Vec<CycleLog>>;

    // ==================== Positions ====================

    /// Persist a newly opened position and return its id
    async fn insert_position(&self, position: &Position) -> Result<i64>;

    /// Persist the exit fields of a position that is still active in storage.
    /// Fails with `InvalidStateTransition` if it was already exited.
    async fn record_exit(&self, position: &Position) -> Result<()>;

    async fn get_position(&self, id: i64) -> Result<Option<Position>>;

    /// Active positions, oldest entry first
    async fn active_positions(&self) -> Result<Vec<Position>>;

    /// Exited positions, most recent exit first
    async fn exited_positions(&self, page: Page) -> Result<Vec<Position>>;

    /// Every exited position, walked page by page until a short page
    async fn all_exited_positions(&self) -> Result<Vec<Position>> {
        let mut all = Vec::new();
        let mut page = Page::new(1, MAX_PER_PAGE);
        loop {
            let batch = self.exited_positions(page).await?;
            let done = batch.len() < page.limit();
            all.extend(batch);
            if done {
                return Ok(all);
            }
            page.page += 1;
        }
    }

    // ==================== Watchlist ====================

    async fn watchlist(&self) -> Result<Vec<WatchlistEntry>>;

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()>;

    /// Hard delete; returns the number of rows removed
    async fn delete_watchlist_entries(&self, pool_ids: &[String]) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        assert_eq!(Page::default().offset(), 0);
        assert_eq!(Page::new(3, 10).offset(), 20);
        assert_eq!(Page::new(0, 10).offset(), 0);
        assert_eq!(Page::new(1, 0).limit(), 1);
    }
}
