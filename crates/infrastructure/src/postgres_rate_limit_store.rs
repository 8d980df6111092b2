//! PostgreSQL-backed per-account admission store.
//!
//! Every mutation is a single guarded statement so concurrent callers racing
//! on one account serialize on the row instead of racing in application
//! code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use replygate_application::{AdmitOutcome, RateLimitPolicy, RateLimitRecord, RateLimitStore};
use replygate_core::{AccountId, AppError, AppResult, OwnerId};

/// PostgreSQL implementation of the rate limit store port.
#[derive(Clone)]
pub struct PostgresRateLimitStore {
    pool: PgPool,
}

impl PostgresRateLimitStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_first_use(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            INSERT INTO account_rate_limits (
                account_id,
                owner_id,
                calls,
                window_started_at,
                is_blocked,
                blocked_until,
                created_at,
                updated_at
            )
            VALUES ($1, $2, 1, $3, FALSE, NULL, $3, $3)
            ON CONFLICT (account_id) DO NOTHING
            RETURNING account_id, owner_id, calls, window_started_at, is_blocked, blocked_until
            "#,
        )
        .bind(account_id.as_str())
        .bind(owner_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to create rate limit record for account '{account_id}': {error}"
            ))
        })?;

        row.map(record_from_row).transpose()
    }

    async fn conditional_increment(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<Option<RateLimitRecord>> {
        // An expired window resets before anything else is evaluated. The
        // soft block arms once per window: the increment that reaches the
        // threshold is still admitted and sets `is_blocked`; once that block
        // has expired the account climbs toward the hard ceiling without
        // re-arming.
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            UPDATE account_rate_limits
            SET
                calls = CASE
                    WHEN window_started_at + make_interval(secs => $3::float8) <= $2 THEN 1
                    ELSE calls + 1
                END,
                is_blocked = CASE
                    WHEN window_started_at + make_interval(secs => $3::float8) <= $2 THEN (1 >= $5)
                    ELSE is_blocked OR (calls + 1 >= $5)
                END,
                blocked_until = CASE
                    WHEN window_started_at + make_interval(secs => $3::float8) <= $2 AND 1 >= $5
                        THEN $2 + make_interval(secs => $4::float8)
                    WHEN window_started_at + make_interval(secs => $3::float8) <= $2
                        THEN NULL
                    WHEN NOT is_blocked AND calls + 1 >= $5
                        THEN $2 + make_interval(secs => $4::float8)
                    ELSE blocked_until
                END,
                window_started_at = CASE
                    WHEN window_started_at + make_interval(secs => $3::float8) <= $2 THEN $2
                    ELSE window_started_at
                END,
                updated_at = $2
            WHERE account_id = $1
              AND (
                    window_started_at + make_interval(secs => $3::float8) <= $2
                    OR (
                        NOT (is_blocked AND blocked_until IS NOT NULL AND blocked_until > $2)
                        AND calls < $6
                        AND (is_blocked OR calls < $5)
                    )
                  )
            RETURNING account_id, owner_id, calls, window_started_at, is_blocked, blocked_until
            "#,
        )
        .bind(account_id.as_str())
        .bind(now)
        .bind(policy.window_seconds as f64)
        .bind(policy.block_seconds as f64)
        .bind(policy.block_threshold)
        .bind(policy.hard_limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to run admission increment for account '{account_id}': {error}"
            ))
        })?;

        row.map(record_from_row).transpose()
    }

    async fn arm_block_on_denial(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            UPDATE account_rate_limits
            SET
                is_blocked = TRUE,
                blocked_until = $2 + make_interval(secs => $4::float8),
                updated_at = $2
            WHERE account_id = $1
              AND window_started_at + make_interval(secs => $3::float8) > $2
              AND NOT is_blocked
              AND calls >= $5
            RETURNING account_id, owner_id, calls, window_started_at, is_blocked, blocked_until
            "#,
        )
        .bind(account_id.as_str())
        .bind(now)
        .bind(policy.window_seconds as f64)
        .bind(policy.block_seconds as f64)
        .bind(policy.block_threshold)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to arm rate limit block for account '{account_id}': {error}"
            ))
        })?;

        row.map(record_from_row).transpose()
    }
}

#[async_trait]
impl RateLimitStore for PostgresRateLimitStore {
    async fn try_admit(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<AdmitOutcome> {
        if let Some(record) = self.insert_first_use(account_id, owner_id, now).await? {
            return Ok(AdmitOutcome::Admitted(record));
        }

        // A lost race between statements falls through to the next attempt;
        // an account deleted mid-flight restarts on the create path.
        for _ in 0..2 {
            if let Some(record) = self.conditional_increment(account_id, now, policy).await? {
                return Ok(AdmitOutcome::Admitted(record));
            }

            if let Some(record) = self.arm_block_on_denial(account_id, now, policy).await? {
                return Ok(AdmitOutcome::Denied(record));
            }

            if let Some(record) = self.find(account_id).await? {
                return Ok(AdmitOutcome::Denied(record));
            }

            if let Some(record) = self.insert_first_use(account_id, owner_id, now).await? {
                return Ok(AdmitOutcome::Admitted(record));
            }
        }

        Err(AppError::Internal(format!(
            "admission attempt for account '{account_id}' could not settle"
        )))
    }

    async fn find(&self, account_id: &AccountId) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT account_id, owner_id, calls, window_started_at, is_blocked, blocked_until
            FROM account_rate_limits
            WHERE account_id = $1
            "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load rate limit record for account '{account_id}': {error}"
            ))
        })?;

        row.map(record_from_row).transpose()
    }

    async fn delete(&self, account_id: &AccountId) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM account_rate_limits
            WHERE account_id = $1
            "#,
        )
        .bind(account_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to delete rate limit record for account '{account_id}': {error}"
            ))
        })?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RateLimitRow {
    account_id: String,
    owner_id: String,
    calls: i32,
    window_started_at: DateTime<Utc>,
    is_blocked: bool,
    blocked_until: Option<DateTime<Utc>>,
}

fn record_from_row(row: RateLimitRow) -> AppResult<RateLimitRecord> {
    Ok(RateLimitRecord {
        account_id: AccountId::new(row.account_id)?,
        owner_id: OwnerId::new(row.owner_id)?,
        calls: row.calls,
        window_started_at: row.window_started_at,
        is_blocked: row.is_blocked,
        blocked_until: row.blocked_until,
    })
}
