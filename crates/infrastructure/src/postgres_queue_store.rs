//! PostgreSQL-backed durable queue store.
//!
//! Claim and finalize transitions are guarded single statements in the style
//! of a lease queue: a transition that matched zero rows means another run
//! owns the item or the item is already terminal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use replygate_application::{
    FinalizeOutcome, NewQueueItem, QueueItem, QueueItemStatus, QueueStats, QueueStore,
};
use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ReplyAction;

/// PostgreSQL implementation of the queue store port.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn insert(&self, item: NewQueueItem) -> AppResult<QueueItem> {
        let action_value = item.action.to_value()?;
        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            INSERT INTO queue_items (
                id,
                account_id,
                owner_id,
                action_kind,
                action,
                priority,
                status,
                window_label,
                position,
                original_timestamp,
                retry_count,
                scheduled_for,
                created_at,
                updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, 'queued', $7,
                1 + (
                    SELECT COUNT(*)
                    FROM queue_items
                    WHERE status = 'queued' AND window_label = $7
                ),
                $8, 0, $9, $10, $10
            )
            RETURNING
                id, account_id, owner_id, action, priority, status, window_label,
                position, original_timestamp, retry_count, result, error,
                scheduled_for, lease_expires_at, created_at, updated_at, processed_at
            "#,
        )
        .bind(item.id)
        .bind(item.account_id.as_str())
        .bind(item.owner_id.as_str())
        .bind(item.action.kind().as_str())
        .bind(action_value)
        .bind(item.priority)
        .bind(item.window_label.as_str())
        .bind(item.original_timestamp)
        .bind(item.scheduled_for)
        .bind(item.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to enqueue item '{}' for account '{}': {error}",
                item.id, item.account_id
            ))
        })?;

        item_from_row(row)
    }

    async fn find(&self, queue_id: Uuid) -> AppResult<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT
                id, account_id, owner_id, action, priority, status, window_label,
                position, original_timestamp, retry_count, result, error,
                scheduled_for, lease_expires_at, created_at, updated_at, processed_at
            FROM queue_items
            WHERE id = $1
            "#,
        )
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load queue item '{queue_id}': {error}"))
        })?;

        row.map(item_from_row).transpose()
    }

    async fn next_batch(&self, window_label: &str, limit: usize) -> AppResult<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT
                id, account_id, owner_id, action, priority, status, window_label,
                position, original_timestamp, retry_count, result, error,
                scheduled_for, lease_expires_at, created_at, updated_at, processed_at
            FROM queue_items
            WHERE status = 'queued' AND window_label = $1
            ORDER BY priority ASC, position ASC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(window_label)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid queue batch limit: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load queue batch for window '{window_label}': {error}"
            ))
        })?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn mark_processing(
        &self,
        queue_id: Uuid,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'processing', lease_expires_at = $3, updated_at = $2
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(queue_id)
        .bind(now)
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim queue item '{queue_id}' for processing: {error}"
            ))
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn finalize(
        &self,
        queue_id: Uuid,
        outcome: FinalizeOutcome,
        now: DateTime<Utc>,
    ) -> AppResult<QueueItem> {
        let (status, result, error) = match outcome {
            FinalizeOutcome::Completed { result } => ("completed", Some(result), None),
            FinalizeOutcome::Failed { error } => ("failed", None, Some(error)),
        };

        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            UPDATE queue_items
            SET
                status = $2,
                result = $3,
                error = $4,
                processed_at = CASE WHEN $2 = 'completed' THEN $5 ELSE processed_at END,
                lease_expires_at = NULL,
                updated_at = $5
            WHERE id = $1 AND status IN ('queued', 'processing')
            RETURNING
                id, account_id, owner_id, action, priority, status, window_label,
                position, original_timestamp, retry_count, result, error,
                scheduled_for, lease_expires_at, created_at, updated_at, processed_at
            "#,
        )
        .bind(queue_id)
        .bind(status)
        .bind(result)
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to finalize queue item '{queue_id}': {error}"
            ))
        })?;

        match row {
            Some(row) => item_from_row(row),
            // Terminal history is immutable; distinguish it from a missing
            // item for the caller.
            None => match self.find(queue_id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "queue item '{queue_id}' is already terminal"
                ))),
                None => Err(AppError::NotFound(format!("queue item '{queue_id}'"))),
            },
        }
    }

    async fn increment_retry(
        &self,
        queue_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<i32>> {
        let retry_count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE queue_items
            SET retry_count = retry_count + 1, updated_at = $2
            WHERE id = $1 AND status = 'queued'
            RETURNING retry_count
            "#,
        )
        .bind(queue_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to bump retry count for queue item '{queue_id}': {error}"
            ))
        })?;

        Ok(retry_count)
    }

    async fn promote_stale(&self, current_label: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            WITH tail AS (
                SELECT COALESCE(MAX(position), 0) AS max_position
                FROM queue_items
                WHERE status = 'queued' AND window_label = $1
            ),
            stale AS (
                SELECT
                    id,
                    ROW_NUMBER() OVER (
                        ORDER BY priority ASC, position ASC, created_at ASC
                    ) AS seq
                FROM queue_items
                WHERE status = 'queued' AND window_label <> $1
            )
            UPDATE queue_items
            SET
                window_label = $1,
                position = tail.max_position + stale.seq,
                updated_at = $2
            FROM stale, tail
            WHERE queue_items.id = stale.id
            "#,
        )
        .bind(current_label)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to promote stale queue items into window '{current_label}': {error}"
            ))
        })?;

        Ok(result.rows_affected())
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET
                status = 'queued',
                lease_expires_at = NULL,
                retry_count = retry_count + 1,
                updated_at = $1
            WHERE status = 'processing'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to reclaim expired queue leases: {error}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, account_id: Option<&AccountId>) -> AppResult<QueueStats> {
        let account_filter = account_id.map(AccountId::as_str);

        let counts = sqlx::query_as::<_, StatusCountsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'queued' THEN 1 ELSE 0 END), 0) AS queued,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                AVG(
                    CASE
                        WHEN status = 'completed' AND processed_at IS NOT NULL
                        THEN EXTRACT(EPOCH FROM (processed_at - created_at)) * 1000
                    END
                ) AS avg_processing_ms
            FROM queue_items
            WHERE $1::TEXT IS NULL OR account_id = $1
            "#,
        )
        .bind(account_filter)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load queue status counts: {error}"))
        })?;

        let by_action = sqlx::query_as::<_, GroupCountRow>(
            r#"
            SELECT action_kind AS label, COUNT(*) AS count
            FROM queue_items
            WHERE $1::TEXT IS NULL OR account_id = $1
            GROUP BY action_kind
            "#,
        )
        .bind(account_filter)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load queue action breakdown: {error}"))
        })?;

        let by_window = sqlx::query_as::<_, GroupCountRow>(
            r#"
            SELECT window_label AS label, COUNT(*) AS count
            FROM queue_items
            WHERE $1::TEXT IS NULL OR account_id = $1
            GROUP BY window_label
            "#,
        )
        .bind(account_filter)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load queue window breakdown: {error}"))
        })?;

        Ok(QueueStats {
            total: counts.total,
            queued: counts.queued,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            by_action: by_action
                .into_iter()
                .map(|row| (row.label, row.count))
                .collect(),
            by_window: by_window
                .into_iter()
                .map(|row| (row.label, row.count))
                .collect(),
            avg_processing_ms: counts.avg_processing_ms,
        })
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE status IN ('completed', 'failed') AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to purge terminal queue items: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    account_id: String,
    owner_id: String,
    action: Value,
    priority: i32,
    status: String,
    window_label: String,
    position: i64,
    original_timestamp: DateTime<Utc>,
    retry_count: i32,
    result: Option<Value>,
    error: Option<String>,
    scheduled_for: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct StatusCountsRow {
    total: i64,
    queued: i64,
    processing: i64,
    completed: i64,
    failed: i64,
    avg_processing_ms: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
struct GroupCountRow {
    label: String,
    count: i64,
}

fn item_from_row(row: QueueItemRow) -> AppResult<QueueItem> {
    Ok(QueueItem {
        id: row.id,
        account_id: AccountId::new(row.account_id)?,
        owner_id: OwnerId::new(row.owner_id)?,
        action: ReplyAction::from_value(&row.action)?,
        priority: row.priority,
        status: QueueItemStatus::parse(row.status.as_str())?,
        window_label: row.window_label,
        position: row.position,
        original_timestamp: row.original_timestamp,
        retry_count: row.retry_count,
        result: row.result,
        error: row.error,
        scheduled_for: row.scheduled_for,
        lease_expires_at: row.lease_expires_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        processed_at: row.processed_at,
    })
}
