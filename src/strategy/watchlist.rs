//! Maturation watchlist
//!
//! Newly detected pools wait here until they have been observed for the
//! minimum age. The engine is the only writer. Every mutation is written to
//! the store first and applied in memory only once the write succeeded, so
//! the in-memory view never runs ahead of what is persisted.

use crate::config::WatchlistConfig;
use crate::domain::{ScoredPool, WatchlistEntry, WatchlistStatus};
use crate::error::{Result, ScoutError};
use crate::persistence::{CycleRecorder, Store};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Counters from one ingest pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct Watchlist {
    config: WatchlistConfig,
    store: Arc<dyn Store>,
    entries: HashMap<String, WatchlistEntry>,
}

impl Watchlist {
    /// Load the persisted entries
    pub async fn load(config: WatchlistConfig, store: Arc<dyn Store>) -> Result<Self> {
        let mut watchlist = Self {
            config,
            store,
            entries: HashMap::new(),
        };
        watchlist.reload().await?;
        Ok(watchlist)
    }

    pub async fn reload(&mut self) -> Result<()> {
        self.entries = self
            .store
            .watchlist()
            .await?
            .into_iter()
            .map(|e| (e.pool_id.clone(), e))
            .collect();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pool_id: &str) -> Option<&WatchlistEntry> {
        self.entries.get(pool_id)
    }

    pub fn is_tracked(&self, pool_id: &str) -> bool {
        self.entries.contains_key(pool_id)
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<&WatchlistEntry> {
        let mut entries: Vec<&WatchlistEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.pool_id.cmp(&b.pool_id)));
        entries
    }

    /// Add the top-N untracked new pools by APY, then move `last_checked`
    /// forward on every tracked entry still present in the universe. Tracked
    /// pools keep their `first_seen` and status.
    pub async fn ingest(
        &mut self,
        scored: &[ScoredPool],
        now: DateTime<Utc>,
        rec: &mut CycleRecorder,
    ) -> IngestSummary {
        let mut candidates: Vec<&ScoredPool> = scored
            .iter()
            .filter(|p| p.is_new && !self.entries.contains_key(p.pool_id()))
            .collect();
        candidates.sort_by(|a, b| b.apy().total_cmp(&a.apy()).then_with(|| a.pool_id().cmp(b.pool_id())));
        candidates.truncate(self.config.top_n);

        let mut summary = IngestSummary::default();

        // Refresh first so freshly inserted entries are not counted twice
        let seen: Vec<WatchlistEntry> = scored
            .iter()
            .filter_map(|p| self.entries.get(p.pool_id()))
            .map(|existing| WatchlistEntry {
                last_checked: now,
                ..existing.clone()
            })
            .collect();

        for entry in seen {
            if let Err(e) = self.store.upsert_watchlist_entry(&entry).await {
                rec.warn(format!("watchlist refresh failed for {}: {e}", entry.pool_id));
                summary.failed += 1;
                continue;
            }
            summary.refreshed += 1;
            self.entries.insert(entry.pool_id.clone(), entry);
        }

        for candidate in candidates {
            let entry = WatchlistEntry {
                pool_id: candidate.pool.pool_id.clone(),
                symbol: candidate.pool.symbol.clone(),
                project: candidate.pool.project.clone(),
                first_seen: now,
                is_new: candidate.is_new,
                last_checked: now,
                status: WatchlistStatus::Watching,
            };

            if let Err(e) = self.store.upsert_watchlist_entry(&entry).await {
                rec.error(format!("watchlist write failed for {}: {e}", entry.pool_id));
                summary.failed += 1;
                continue;
            }

            rec.info(format!(
                "watching {} ({} / {}): {}",
                entry.pool_id, entry.project, entry.symbol, candidate.detection_reason
            ));
            summary.inserted += 1;
            self.entries.insert(entry.pool_id.clone(), entry);
        }

        summary
    }

    /// Hard delete entries past the pruning horizon that never got invested.
    /// Returns the number removed.
    pub async fn prune(&mut self, now: DateTime<Utc>, rec: &mut CycleRecorder) -> usize {
        let max_age = self.config.max_age();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now, max_age))
            .map(|e| e.pool_id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        match self.store.delete_watchlist_entries(&expired).await {
            Ok(_) => {
                for id in &expired {
                    self.entries.remove(id);
                }
                rec.info(format!("pruned {} stale watchlist entries", expired.len()));
                expired.len()
            }
            Err(e) => {
                rec.error(format!("watchlist prune failed: {e}"));
                0
            }
        }
    }

    /// Watching entries that reached the minimum age, oldest first
    pub fn matured(&self, now: DateTime<Utc>) -> Vec<WatchlistEntry> {
        let min_age = self.config.min_age();
        self.entries()
            .into_iter()
            .filter(|e| e.is_matured(now, min_age))
            .cloned()
            .collect()
    }

    pub async fn mark_invested(&mut self, pool_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(pool_id, WatchlistStatus::Invested, now).await
    }

    /// Stop considering a matured pool that vanished from the source
    pub async fn mark_ignored(&mut self, pool_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(pool_id, WatchlistStatus::Ignored, now).await
    }

    /// Drop the invested entry of an exited position so the pool can be
    /// detected again later. Returns whether an entry was removed.
    pub async fn release(&mut self, pool_id: &str) -> Result<bool> {
        match self.entries.get(pool_id) {
            Some(e) if e.status == WatchlistStatus::Invested => {}
            _ => return Ok(false),
        }
        self.store
            .delete_watchlist_entries(&[pool_id.to_string()])
            .await?;
        self.entries.remove(pool_id);
        Ok(true)
    }

    async fn transition(
        &mut self,
        pool_id: &str,
        target: WatchlistStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let current = self
            .entries
            .get(pool_id)
            .ok_or_else(|| ScoutError::Validation(format!("pool {pool_id} is not on the watchlist")))?;

        if !current.status.can_transition_to(target) {
            return Err(ScoutError::InvalidStateTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        let updated = WatchlistEntry {
            status: target,
            last_checked: now,
            ..current.clone()
        };
        self.store.upsert_watchlist_entry(&updated).await?;
        self.entries.insert(pool_id.to_string(), updated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PoolSnapshot;
    use crate::persistence::MemoryStore;
    use chrono::Duration;

    fn scored(id: &str, apy: f64, is_new: bool) -> ScoredPool {
        ScoredPool {
            pool: PoolSnapshot {
                pool_id: id.into(),
                symbol: format!("{id}-USDC"),
                project: "orca".into(),
                apy,
                tvl_usd: 200_000.0,
                ..Default::default()
            },
            risk_score: 3,
            profit_potential: 0.4,
            is_new,
            detection_reason: if is_new { "high_apy: test".into() } else { String::new() },
        }
    }

    async fn watchlist(top_n: usize) -> (Watchlist, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = WatchlistConfig {
            top_n,
            ..WatchlistConfig::default()
        };
        let wl = Watchlist::load(config, store.clone()).await.unwrap();
        (wl, store)
    }

    #[tokio::test]
    async fn test_ingest_takes_top_new_pools_by_apy() {
        let (mut wl, store) = watchlist(2).await;
        let mut rec = CycleRecorder::new(1);
        let now = Utc::now();

        let summary = wl
            .ingest(
                &[
                    scored("low", 60.0, true),
                    scored("high", 400.0, true),
                    scored("mid", 220.0, true),
                    scored("old", 900.0, false),
                ],
                now,
                &mut rec,
            )
            .await;

        assert_eq!(summary.inserted, 2);
        assert!(wl.is_tracked("high"));
        assert!(wl.is_tracked("mid"));
        assert!(!wl.is_tracked("old"));
        assert_eq!(store.watchlist().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reingest_keeps_first_seen() {
        let (mut wl, _) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(15);

        wl.ingest(&[scored("a", 300.0, true)], t0, &mut rec).await;
        let summary = wl.ingest(&[scored("a", 310.0, true)], t1, &mut rec).await;

        assert_eq!(summary.refreshed, 1);
        let entry = wl.get("a").unwrap();
        assert_eq!(entry.first_seen, t0);
        assert_eq!(entry.last_checked, t1);
    }

    #[tokio::test]
    async fn test_reingest_refreshes_tracked_pools_outside_top_n() {
        let (mut wl, _) = watchlist(1).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(15);

        wl.ingest(&[scored("a", 300.0, true)], t0, &mut rec).await;
        // "a" is no longer new and a hotter pool takes the only slot
        let summary = wl
            .ingest(&[scored("a", 120.0, false), scored("b", 500.0, true)], t1, &mut rec)
            .await;

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(wl.get("a").unwrap().last_checked, t1);
        assert_eq!(wl.get("a").unwrap().first_seen, t0);
        assert!(wl.is_tracked("b"));
    }

    #[tokio::test]
    async fn test_matured_respects_min_age() {
        let (mut wl, _) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();

        wl.ingest(&[scored("a", 300.0, true)], t0, &mut rec).await;
        assert!(wl.matured(t0 + Duration::minutes(10)).is_empty());
        assert_eq!(wl.matured(t0 + Duration::minutes(30)).len(), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_stale_watching_only() {
        let (mut wl, store) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();

        wl.ingest(&[scored("stale", 300.0, true), scored("held", 250.0, true)], t0, &mut rec)
            .await;
        wl.mark_invested("held", t0).await.unwrap();

        let removed = wl.prune(t0 + Duration::days(8), &mut rec).await;

        assert_eq!(removed, 1);
        assert!(!wl.is_tracked("stale"));
        assert!(wl.is_tracked("held"));
        assert_eq!(store.watchlist().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invested_never_returns_to_watching() {
        let (mut wl, _) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();

        wl.ingest(&[scored("a", 300.0, true)], t0, &mut rec).await;
        wl.mark_invested("a", t0).await.unwrap();

        let err = wl.mark_ignored("a", t0).await.unwrap_err();
        assert!(matches!(err, ScoutError::InvalidStateTransition { .. }));

        // re-detection does not reset the status
        wl.ingest(&[scored("a", 300.0, true)], t0 + Duration::hours(1), &mut rec)
            .await;
        assert_eq!(wl.get("a").unwrap().status, WatchlistStatus::Invested);
        assert!(wl.matured(t0 + Duration::hours(2)).is_empty());
    }

    #[tokio::test]
    async fn test_release_only_removes_invested() {
        let (mut wl, _) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        let t0 = Utc::now();

        wl.ingest(&[scored("a", 300.0, true), scored("b", 280.0, true)], t0, &mut rec)
            .await;
        wl.mark_invested("a", t0).await.unwrap();

        assert!(wl.release("a").await.unwrap());
        assert!(!wl.release("b").await.unwrap());
        assert!(!wl.is_tracked("a"));
        assert!(wl.is_tracked("b"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let (mut wl, store) = watchlist(5).await;
        let mut rec = CycleRecorder::new(1);
        store.set_fail_writes(true);

        let summary = wl.ingest(&[scored("a", 300.0, true)], Utc::now(), &mut rec).await;

        assert_eq!(summary.failed, 1);
        assert!(wl.is_empty());
        assert_eq!(rec.count(crate::domain::LogLevel::Error), 1);
    }
}
