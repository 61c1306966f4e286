use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a persisted cycle log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for LogLevel {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Structured log entry tagged with the cycle that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleLog {
    pub cycle_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One scheduler tick. Append-only; only the summary counters are filled in
/// when the cycle finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCycle {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_pools_found: usize,
    pub new_pools_found: usize,
    pub active_positions: usize,
    pub watchlist_size: usize,
    pub positions_opened: usize,
    pub positions_exited: usize,
    /// Set when a phase failed or was skipped
    pub failure: Option<String>,
}

impl DetectionCycle {
    pub fn started(id: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            completed_at: None,
            total_pools_found: 0,
            new_pools_found: 0,
            active_positions: 0,
            watchlist_size: 0,
            positions_opened: 0,
            positions_exited: 0,
            failure: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }

    /// Record a failure without losing an earlier one
    pub fn note_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.failure = Some(match self.failure.take() {
            Some(prev) => format!("{prev}; {message}"),
            None => message,
        });
    }
}
