use crate::domain::{
    CycleLog, DetectionCycle, ExitReason, LogLevel, Position, PositionStatus, WatchlistEntry,
    WatchlistStatus,
};
use crate::error::{Result, ScoutError};
use crate::persistence::{Page, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, instrument};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const POSITION_COLUMNS: &str = r#"
    id, cycle_id, pool_id, symbol, project, status, principal_usd, entry_time,
    entry_apy, entry_reward_apy, entry_tvl, entry_risk_score, is_new,
    detection_reason, exit_time, exit_apy, exit_reason, profit_loss
"#;

/// Decode a text enum column; unknown values surface as a column decode error
fn parse_column<T>(column: &str, raw: &str) -> Result<T>
where
    T: for<'a> TryFrom<&'a str, Error = String>,
{
    T::try_from(raw).map_err(|e| {
        ScoutError::Database(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: e.into(),
        })
    })
}

fn position_from_row(r: &PgRow) -> Result<Position> {
    Ok(Position {
        id: Some(r.get("id")),
        cycle_id: r.get("cycle_id"),
        pool_id: r.get("pool_id"),
        symbol: r.get("symbol"),
        project: r.get("project"),
        status: parse_column::<PositionStatus>("status", &r.get::<String, _>("status"))?,
        principal_usd: r.get("principal_usd"),
        entry_time: r.get("entry_time"),
        entry_apy: r.get("entry_apy"),
        entry_reward_apy: r.get("entry_reward_apy"),
        entry_tvl: r.get("entry_tvl"),
        entry_risk_score: r.get::<i16, _>("entry_risk_score").clamp(0, 10) as u8,
        is_new: r.get("is_new"),
        detection_reason: r.get("detection_reason"),
        exit_time: r.get("exit_time"),
        exit_apy: r.get("exit_apy"),
        exit_reason: r
            .get::<Option<String>, _>("exit_reason")
            .map(|s| parse_column::<ExitReason>("exit_reason", &s))
            .transpose()?,
        profit_loss: r.get("profit_loss"),
    })
}

fn cycle_from_row(r: &PgRow) -> DetectionCycle {
    let count = |col: &str| r.get::<i32, _>(col).max(0) as usize;
    DetectionCycle {
        id: r.get("id"),
        started_at: r.get("started_at"),
        completed_at: r.get("completed_at"),
        total_pools_found: count("total_pools_found"),
        new_pools_found: count("new_pools_found"),
        active_positions: count("active_positions"),
        watchlist_size: count("watchlist_size"),
        positions_opened: count("positions_opened"),
        positions_exited: count("positions_exited"),
        failure: r.get("failure"),
    }
}

fn watchlist_from_row(r: &PgRow) -> Result<WatchlistEntry> {
    Ok(WatchlistEntry {
        pool_id: r.get("pool_id"),
        symbol: r.get("symbol"),
        project: r.get("project"),
        first_seen: r.get("first_seen"),
        is_new: r.get("is_new"),
        last_checked: r.get("last_checked"),
        status: parse_column::<WatchlistStatus>("status", &r.get::<String, _>("status"))?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    // ==================== Cycles ====================

    #[instrument(skip(self))]
    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("INSERT INTO detection_cycles (started_at) VALUES ($1) RETURNING id")
            .bind(started_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("id"))
    }

    #[instrument(skip(self, cycle), fields(cycle_id = cycle.id))]
    async fn finish_cycle(&self, cycle: &DetectionCycle) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE detection_cycles SET
                completed_at = $2,
                total_pools_found = $3,
                new_pools_found = $4,
                active_positions = $5,
                watchlist_size = $6,
                positions_opened = $7,
                positions_exited = $8,
                failure = $9
            WHERE id = $1
            "#,
        )
        .bind(cycle.id)
        .bind(cycle.completed_at)
        .bind(cycle.total_pools_found as i32)
        .bind(cycle.new_pools_found as i32)
        .bind(cycle.active_positions as i32)
        .bind(cycle.watchlist_size as i32)
        .bind(cycle.positions_opened as i32)
        .bind(cycle.positions_exited as i32)
        .bind(&cycle.failure)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScoutError::Internal(format!("cycle {} not found", cycle.id)));
        }
        Ok(())
    }

    async fn append_logs(&self, logs: &[CycleLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for log in logs {
            sqlx::query(
                "INSERT INTO cycle_logs (cycle_id, level, message, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(log.cycle_id)
            .bind(log.level.as_str())
            .bind(&log.message)
            .bind(log.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<DetectionCycle>> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, completed_at, total_pools_found, new_pools_found,
                   active_positions, watchlist_size, positions_opened, positions_exited, failure
            FROM detection_cycles
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(cycle_from_row).collect())
    }

    async fn cycle_logs(&self, cycle_id: i64) -> Result<Vec<CycleLog>> {
        let rows = sqlx::query(
            r#"
            SELECT cycle_id, level, message, created_at
            FROM cycle_logs
            WHERE cycle_id = $1
            ORDER BY id
            "#,
        )
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(CycleLog {
                    cycle_id: r.get("cycle_id"),
                    level: parse_column::<LogLevel>("level", &r.get::<String, _>("level"))?,
                    message: r.get("message"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    // ==================== Positions ====================

    #[instrument(skip(self, position), fields(pool_id = %position.pool_id))]
    async fn insert_position(&self, position: &Position) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO positions (
                cycle_id, pool_id, symbol, project, status, principal_usd, entry_time,
                entry_apy, entry_reward_apy, entry_tvl, entry_risk_score, is_new, detection_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(position.cycle_id)
        .bind(&position.pool_id)
        .bind(&position.symbol)
        .bind(&position.project)
        .bind(position.status.as_str())
        .bind(position.principal_usd)
        .bind(position.entry_time)
        .bind(position.entry_apy)
        .bind(position.entry_reward_apy)
        .bind(position.entry_tvl)
        .bind(position.entry_risk_score as i16)
        .bind(position.is_new)
        .bind(&position.detection_reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    #[instrument(skip(self, position), fields(position_id = ?position.id))]
    async fn record_exit(&self, position: &Position) -> Result<()> {
        let id = position
            .id
            .ok_or_else(|| ScoutError::Internal("position has no id".to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE positions SET
                status = $2,
                exit_time = $3,
                exit_apy = $4,
                exit_reason = $5,
                profit_loss = $6
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(position.status.as_str())
        .bind(position.exit_time)
        .bind(position.exit_apy)
        .bind(position.exit_reason.map(|r| r.as_str()))
        .bind(position.profit_loss)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_position(id).await? {
                Some(stored) => Err(ScoutError::InvalidStateTransition {
                    from: stored.status.to_string(),
                    to: position.status.to_string(),
                }),
                None => Err(ScoutError::PositionNotFound(id)),
            };
        }
        Ok(())
    }

    async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let row = sqlx::query(&format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn active_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE status = 'active' ORDER BY entry_time, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn exited_positions(&self, page: Page) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {POSITION_COLUMNS} FROM positions
            WHERE status = 'exited'
            ORDER BY exit_time DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    // ==================== Watchlist ====================

    async fn watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT pool_id, symbol, project, first_seen, is_new, last_checked, status
            FROM watchlist_pools
            ORDER BY first_seen, pool_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(watchlist_from_row).collect()
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_pools (pool_id, symbol, project, first_seen, is_new, last_checked, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (pool_id) DO UPDATE SET
                symbol = EXCLUDED.symbol,
                project = EXCLUDED.project,
                last_checked = EXCLUDED.last_checked,
                status = EXCLUDED.status
            "#,
        )
        .bind(&entry.pool_id)
        .bind(&entry.symbol)
        .bind(&entry.project)
        .bind(entry.first_seen)
        .bind(entry.is_new)
        .bind(entry.last_checked)
        .bind(entry.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_watchlist_entries(&self, pool_ids: &[String]) -> Result<u64> {
        if pool_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM watchlist_pools WHERE pool_id = ANY($1)")
            .bind(pool_ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column_known_values() {
        let status: PositionStatus = parse_column("status", "active").unwrap();
        assert_eq!(status, PositionStatus::Active);

        let reason: ExitReason = parse_column("exit_reason", "apy_drop").unwrap();
        assert_eq!(reason, ExitReason::ApyDrop);
    }

    #[test]
    fn test_parse_column_rejects_unknown_status() {
        let err = parse_column::<PositionStatus>("status", "archived").unwrap_err();
        assert!(err.is_persistence());
        match err {
            ScoutError::Database(sqlx::Error::ColumnDecode { index, .. }) => {
                assert_eq!(index, "status")
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = parse_column::<WatchlistStatus>("status", "").unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }
}
