use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a watchlist entry.
///
/// `Watching` is the only non-terminal state; an entry never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistStatus {
    Watching,
    Invested,
    Ignored,
}

impl WatchlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchlistStatus::Watching => "watching",
            WatchlistStatus::Invested => "invested",
            WatchlistStatus::Ignored => "ignored",
        }
    }

    pub fn can_transition_to(&self, target: WatchlistStatus) -> bool {
        use WatchlistStatus::*;
        matches!((self, target), (Watching, Invested) | (Watching, Ignored))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WatchlistStatus::Watching)
    }
}

impl fmt::Display for WatchlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for WatchlistStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "watching" => Ok(WatchlistStatus::Watching),
            "invested" => Ok(WatchlistStatus::Invested),
            "ignored" => Ok(WatchlistStatus::Ignored),
            other => Err(format!("unknown watchlist status: {other}")),
        }
    }
}

/// A candidate pool held until it has been observed long enough
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub pool_id: String,
    pub symbol: String,
    pub project: String,
    pub first_seen: DateTime<Utc>,
    pub is_new: bool,
    pub last_checked: DateTime<Utc>,
    pub status: WatchlistStatus,
}

impl WatchlistEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.first_seen
    }

    /// Watching and observed for at least `min_age`
    pub fn is_matured(&self, now: DateTime<Utc>, min_age: Duration) -> bool {
        self.status == WatchlistStatus::Watching && self.age(now) >= min_age
    }

    /// Past the pruning horizon and not invested
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.status != WatchlistStatus::Invested && self.age(now) > max_age
    }
}
