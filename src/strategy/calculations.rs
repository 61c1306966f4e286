//! Simulated yield calculations shared by the exit path and reporting
//!
//! A position earns the midpoint of its entry and exit APY as one static
//! rate, compounded daily over the actual hold duration:
//!
//! `final = P * (1 + r/n)^(n*t)` with `r = avg_apy / 100`, `n = 365`,
//! `t = hold_days / 365`.

use crate::domain::Position;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;

pub const COMPOUNDS_PER_YEAR: f64 = 365.0;
pub const DAYS_PER_YEAR: f64 = 365.0;

/// USD amounts are stored to the cent
pub const USD_DP: u32 = 2;

/// Point at which a position is (or would be) closed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitPoint {
    pub timestamp: DateTime<Utc>,
    pub exit_apy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldProjection {
    pub hold_days: f64,
    /// Midpoint of entry and exit APY, in percent
    pub average_apy: f64,
    pub final_amount: Decimal,
    pub total_return: Decimal,
}

/// Compound growth factor `(1 + r/n)^(n*t)`
pub fn growth_factor(average_apy: f64, hold_days: f64) -> f64 {
    let r = average_apy / 100.0;
    let t = hold_days / DAYS_PER_YEAR;
    (1.0 + r / COMPOUNDS_PER_YEAR).powf(COMPOUNDS_PER_YEAR * t)
}

pub fn calculate_yield(position: &Position, exit: ExitPoint) -> YieldProjection {
    let hold_secs = (exit.timestamp - position.entry_time).num_seconds().max(0);
    let hold_days = hold_secs as f64 / 86_400.0;
    let average_apy = (position.entry_apy + exit.exit_apy) / 2.0;

    let principal = position.principal_usd.to_f64().unwrap_or_default();
    let final_f64 = principal * growth_factor(average_apy, hold_days);
    let final_amount = usd(final_f64);

    YieldProjection {
        hold_days,
        average_apy,
        final_amount,
        total_return: final_amount - position.principal_usd.round_dp(USD_DP),
    }
}

/// Convert a float amount to cents; non-finite values become zero
pub fn usd(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(USD_DP)
}
