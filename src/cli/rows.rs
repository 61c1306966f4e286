//! Table rows for the read-only commands

use crate::domain::{CycleLog, DetectionCycle, Position, WatchlistEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

fn ts(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

fn opt_ts(t: Option<DateTime<Utc>>) -> String {
    t.map(ts).unwrap_or_else(|| "-".to_string())
}

fn pct(v: f64) -> String {
    format!("{v:.2}%")
}

#[derive(Debug, Tabled, Serialize)]
pub struct PositionRow {
    #[tabled(rename = "ID")]
    pub id: i64,
    #[tabled(rename = "Pool")]
    pub pool_id: String,
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "Project")]
    pub project: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Entered")]
    pub entry_time: String,
    #[tabled(rename = "Entry APY")]
    pub entry_apy: String,
    #[tabled(rename = "Risk")]
    pub risk: u8,
    #[tabled(rename = "Exited")]
    pub exit_time: String,
    #[tabled(rename = "Exit APY")]
    pub exit_apy: String,
    #[tabled(rename = "Reason")]
    pub exit_reason: String,
    #[tabled(rename = "P&L (USD)")]
    pub profit_loss: String,
}

impl From<&Position> for PositionRow {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id.unwrap_or_default(),
            pool_id: p.pool_id.clone(),
            symbol: p.symbol.clone(),
            project: p.project.clone(),
            status: p.status.to_string(),
            entry_time: ts(p.entry_time),
            entry_apy: pct(p.entry_apy),
            risk: p.entry_risk_score,
            exit_time: opt_ts(p.exit_time),
            exit_apy: p.exit_apy.map(pct).unwrap_or_else(|| "-".to_string()),
            exit_reason: p
                .exit_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
            profit_loss: p
                .profit_loss
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Tabled, Serialize)]
pub struct WatchlistRow {
    #[tabled(rename = "Pool")]
    pub pool_id: String,
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "Project")]
    pub project: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "First seen")]
    pub first_seen: String,
    #[tabled(rename = "Last checked")]
    pub last_checked: String,
    #[tabled(rename = "Age (min)")]
    pub age_minutes: i64,
}

impl WatchlistRow {
    pub fn new(entry: &WatchlistEntry, now: DateTime<Utc>) -> Self {
        Self {
            pool_id: entry.pool_id.clone(),
            symbol: entry.symbol.clone(),
            project: entry.project.clone(),
            status: entry.status.to_string(),
            first_seen: ts(entry.first_seen),
            last_checked: ts(entry.last_checked),
            age_minutes: entry.age(now).num_minutes(),
        }
    }
}

#[derive(Debug, Tabled, Serialize)]
pub struct CycleRow {
    #[tabled(rename = "Cycle")]
    pub id: i64,
    #[tabled(rename = "Started")]
    pub started_at: String,
    #[tabled(rename = "Completed")]
    pub completed_at: String,
    #[tabled(rename = "Pools")]
    pub pools: usize,
    #[tabled(rename = "New")]
    pub new_pools: usize,
    #[tabled(rename = "Watchlist")]
    pub watchlist: usize,
    #[tabled(rename = "Active")]
    pub active: usize,
    #[tabled(rename = "Opened")]
    pub opened: usize,
    #[tabled(rename = "Exited")]
    pub exited: usize,
    #[tabled(rename = "Failure")]
    pub failure: String,
}

impl From<&DetectionCycle> for CycleRow {
    fn from(c: &DetectionCycle) -> Self {
        Self {
            id: c.id,
            started_at: ts(c.started_at),
            completed_at: opt_ts(c.completed_at),
            pools: c.total_pools_found,
            new_pools: c.new_pools_found,
            watchlist: c.watchlist_size,
            active: c.active_positions,
            opened: c.positions_opened,
            exited: c.positions_exited,
            failure: c.failure.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Tabled, Serialize)]
pub struct LogRow {
    #[tabled(rename = "Time")]
    pub created_at: String,
    #[tabled(rename = "Level")]
    pub level: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl From<&CycleLog> for LogRow {
    fn from(log: &CycleLog) -> Self {
        Self {
            created_at: log.created_at.format("%H:%M:%S").to_string(),
            level: log.level.to_string(),
            message: log.message.clone(),
        }
    }
}
