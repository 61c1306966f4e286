//! Yield-aggregator REST client
//!
//! The endpoint returns the whole multi-chain universe in one response. Records
//! are parsed leniently: a malformed record is skipped, never the whole fetch.

use super::PoolDataSource;
use crate::config::SourceConfig;
use crate::domain::{Exposure, PoolSnapshot};
use crate::error::{Result, ScoutError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LlamaYieldsClient {
    http: Client,
    config: SourceConfig,
}

impl LlamaYieldsClient {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("yieldscout/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| ScoutError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    async fn fetch_once(&self) -> Result<String> {
        let resp = tokio::time::timeout(self.config.timeout(), self.http.get(&self.config.url).send())
            .await
            .map_err(|_| ScoutError::SourceTimeout {
                secs: self.config.timeout_secs,
            })??;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScoutError::SourceUnavailable(format!(
                "GET {} returned {}",
                self.config.url, status
            )));
        }

        Ok(resp.text().await?)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.retry_backoff_ms);
        base * 2u32.saturating_pow(attempt.saturating_sub(1).min(6))
    }
}

#[async_trait]
impl PoolDataSource for LlamaYieldsClient {
    async fn fetch_pools(&self) -> Result<Vec<PoolSnapshot>> {
        let mut attempt: u32 = 0;

        let body = loop {
            match self.fetch_once().await {
                Ok(body) => break body,
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        "Pool fetch failed (attempt {}): {}; retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let pools = parse_pools(&body, &self.config.chain)?;
        info!(chain = %self.config.chain, pools = pools.len(), "Fetched pool universe");
        Ok(pools)
    }
}

/// Parse a response body (`{"data": [...]}` or a bare array) and keep the
/// pools on `chain`.
pub fn parse_pools(body: &str, chain: &str) -> Result<Vec<PoolSnapshot>> {
    let root: Value = serde_json::from_str(body)?;
    let records = match &root {
        Value::Array(items) => items.as_slice(),
        other => pick_array(other, &["data", "pools"]).ok_or_else(|| {
            ScoutError::SourceUnavailable("response has no pool array".to_string())
        })?,
    };

    let mut skipped = 0usize;
    let pools: Vec<PoolSnapshot> = records
        .iter()
        .filter(|r| {
            pick_str(r, &["chain"]).is_some_and(|c| c.trim().eq_ignore_ascii_case(chain.trim()))
        })
        .filter_map(|r| {
            let parsed = map_pool(r);
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();

    if skipped > 0 {
        debug!(skipped, "Skipped malformed pool records");
    }
    Ok(pools)
}

fn map_pool(record: &Value) -> Option<PoolSnapshot> {
    let pool_id = pick_str(record, &["pool", "id"])?.trim().to_string();
    if pool_id.is_empty() {
        return None;
    }

    let apy_base = pick_f64(record, &["apyBase"]);
    let apy_reward = pick_f64(record, &["apyReward"]);
    let apy = pick_f64(record, &["apy"])
        .or_else(|| match (apy_base, apy_reward) {
            (None, None) => None,
            (b, r) => Some(b.unwrap_or(0.0) + r.unwrap_or(0.0)),
        })?;

    let reward_tokens = pick_array(record, &["rewardTokens"])
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let exposure = match pick_str(record, &["exposure"]) {
        Some(e) if e.eq_ignore_ascii_case("multi") => Exposure::Multi,
        _ => Exposure::Single,
    };

    let predicted_down = record
        .get("predictions")
        .and_then(|p| pick_str(p, &["predictedClass"]))
        .is_some_and(|c| c.to_ascii_lowercase().contains("down"));

    Some(PoolSnapshot {
        pool_id,
        symbol: pick_str(record, &["symbol"]).unwrap_or_default().to_string(),
        project: pick_str(record, &["project"]).unwrap_or_default().to_string(),
        chain: pick_str(record, &["chain"]).unwrap_or_default().to_string(),
        apy,
        apy_base,
        apy_reward,
        reward_tokens,
        tvl_usd: pick_f64(record, &["tvlUsd"]).unwrap_or(0.0),
        volume_usd_1d: pick_f64(record, &["volumeUsd1d"]),
        tvl_growth_pct_1d: pick_f64(record, &["tvlGrowthPct1d"]),
        sigma: pick_f64(record, &["sigma"]),
        il_risk: pick_bool(record, &["ilRisk"]).unwrap_or(false),
        predicted_down,
        exposure,
        first_seen_at: record.get("firstSeenAt").and_then(parse_timestamp),
    })
}

fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
    keys.iter()
        .find_map(|key| root.get(*key).and_then(|v| v.as_array()).map(Vec::as_slice))
}

fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| root.get(*key)).and_then(|v| v.as_str())
}

fn pick_f64(root: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| root.get(*key))
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|v: &f64| v.is_finite())
}

fn pick_bool(root: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| root.get(*key)).and_then(|v| {
        if let Some(b) = v.as_bool() {
            Some(b)
        } else {
            v.as_str()
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        }
    })
}

// RFC 3339 string, or unix seconds / milliseconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}
