//! PostgreSQL-backed append-only admission audit log.

use async_trait::async_trait;
use sqlx::PgPool;

use replygate_application::{AccountUsage, AdmissionLogEntry, AdmissionLogStore};
use replygate_core::{AccountId, AppError, AppResult};

/// PostgreSQL implementation of the admission log port.
#[derive(Clone)]
pub struct PostgresAdmissionLog {
    pool: PgPool,
}

impl PostgresAdmissionLog {
    /// Creates a log with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdmissionLogStore for PostgresAdmissionLog {
    async fn append(&self, entry: AdmissionLogEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admission_log (
                account_id,
                owner_id,
                action_kind,
                status,
                remaining_calls,
                delay_ms,
                logged_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.account_id.as_str())
        .bind(entry.owner_id.as_str())
        .bind(entry.action.as_str())
        .bind(entry.status.as_str())
        .bind(entry.remaining_calls)
        .bind(entry.delay_ms)
        .bind(entry.logged_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to append admission log entry for account '{}': {error}",
                entry.account_id
            ))
        })?;

        Ok(())
    }

    async fn top_accounts(&self, limit: usize) -> AppResult<Vec<AccountUsage>> {
        let rows = sqlx::query_as::<_, AccountUsageRow>(
            r#"
            SELECT account_id, COUNT(*) AS total_calls
            FROM admission_log
            WHERE status = 'success'
            GROUP BY account_id
            ORDER BY total_calls DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid top accounts limit: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load admission log top accounts: {error}"))
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(AccountUsage {
                    account_id: AccountId::new(row.account_id)?,
                    total_calls: row.total_calls,
                })
            })
            .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountUsageRow {
    account_id: String,
    total_calls: i64,
}
