//! PostgreSQL-backed global quota window store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use replygate_application::{GlobalWindow, GlobalWindowStatus, GlobalWindowStore};
use replygate_core::{AppError, AppResult};

/// PostgreSQL implementation of the global window store port.
#[derive(Clone)]
pub struct PostgresGlobalWindowStore {
    pool: PgPool,
}

impl PostgresGlobalWindowStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GlobalWindowStore for PostgresGlobalWindowStore {
    async fn try_increment(
        &self,
        window_started_at: DateTime<Utc>,
        window_ends_at: DateTime<Utc>,
        app_limit: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<GlobalWindow>> {
        // UPSERT with a guarded update: the increment and the ceiling check
        // are one statement, so the window can never overshoot its limit.
        let row = sqlx::query_as::<_, GlobalWindowRow>(
            r#"
            INSERT INTO global_windows (
                window_started_at,
                window_ends_at,
                global_calls,
                app_limit,
                accounts_processed,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, 1, $3, 0, 'active', $4, $4)
            ON CONFLICT (window_started_at) DO UPDATE
            SET
                global_calls = global_windows.global_calls + 1,
                updated_at = $4
            WHERE global_windows.global_calls < global_windows.app_limit
              AND global_windows.status <> 'completed'
            RETURNING
                window_started_at, window_ends_at, global_calls, app_limit,
                accounts_processed, status
            "#,
        )
        .bind(window_started_at)
        .bind(window_ends_at)
        .bind(app_limit)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to increment global window starting {window_started_at}: {error}"
            ))
        })?;

        row.map(window_from_row).transpose()
    }

    async fn find(&self, window_started_at: DateTime<Utc>) -> AppResult<Option<GlobalWindow>> {
        let row = sqlx::query_as::<_, GlobalWindowRow>(
            r#"
            SELECT
                window_started_at, window_ends_at, global_calls, app_limit,
                accounts_processed, status
            FROM global_windows
            WHERE window_started_at = $1
            "#,
        )
        .bind(window_started_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load global window starting {window_started_at}: {error}"
            ))
        })?;

        row.map(window_from_row).transpose()
    }

    async fn add_accounts_processed(
        &self,
        window_started_at: DateTime<Utc>,
        accounts: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE global_windows
            SET
                accounts_processed = accounts_processed + $2,
                status = CASE WHEN status = 'active' THEN 'processing' ELSE status END,
                updated_at = $3
            WHERE window_started_at = $1 AND status <> 'completed'
            "#,
        )
        .bind(window_started_at)
        .bind(accounts)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record processed accounts on global window starting {window_started_at}: {error}"
            ))
        })?;

        Ok(())
    }

    async fn finalize_ended(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE global_windows
            SET status = 'completed', updated_at = $1
            WHERE window_ends_at <= $1 AND status <> 'completed'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to finalize ended global windows: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GlobalWindowRow {
    window_started_at: DateTime<Utc>,
    window_ends_at: DateTime<Utc>,
    global_calls: i64,
    app_limit: i64,
    accounts_processed: i64,
    status: String,
}

fn window_from_row(row: GlobalWindowRow) -> AppResult<GlobalWindow> {
    Ok(GlobalWindow {
        window_started_at: row.window_started_at,
        window_ends_at: row.window_ends_at,
        global_calls: row.global_calls,
        app_limit: row.app_limit,
        accounts_processed: row.accounts_processed,
        status: GlobalWindowStatus::parse(row.status.as_str())?,
    })
}
