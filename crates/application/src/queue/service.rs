use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ReplyAction;

use super::ports::QueueStore;
use super::types::{EnqueueReceipt, FinalizeOutcome, NewQueueItem, QueueItem, QueueStats};
use crate::admission_log::{AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
use crate::clock::{Clock, window_label_at};

/// Default drain priority for callers that do not pick one.
pub const DEFAULT_PRIORITY: i32 = 3;

const MAX_PRIORITY: i32 = 100;

/// Enqueue payload accepted from callers that were denied admission.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    /// Account the action runs for.
    pub account_id: AccountId,
    /// Owner of the account.
    pub owner_id: OwnerId,
    /// The action to defer.
    pub action: ReplyAction,
    /// Drain priority; lower is more urgent. Defaults to [`DEFAULT_PRIORITY`].
    pub priority: Option<i32>,
    /// When the caller originally attempted the action. Defaults to the
    /// enqueue instant.
    pub original_timestamp: Option<DateTime<Utc>>,
}

/// Application service over the durable deferred-action queue.
#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn QueueStore>,
    log: Arc<dyn AdmissionLogStore>,
    clock: Arc<dyn Clock>,
}

impl QueueService {
    /// Creates a queue service.
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        log: Arc<dyn AdmissionLogStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, log, clock }
    }

    /// Durably defers one denied action. Every denied call must land here;
    /// there is no silent drop.
    pub async fn enqueue(&self, request: EnqueueRequest) -> AppResult<EnqueueReceipt> {
        request.action.validate()?;

        let priority = request.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(0..=MAX_PRIORITY).contains(&priority) {
            return Err(AppError::Validation(format!(
                "priority must be between 0 and {MAX_PRIORITY}"
            )));
        }

        let now = self.clock.now();
        let item = self
            .store
            .insert(NewQueueItem {
                id: Uuid::new_v4(),
                account_id: request.account_id.clone(),
                owner_id: request.owner_id.clone(),
                action: request.action.clone(),
                priority,
                window_label: window_label_at(now),
                original_timestamp: request.original_timestamp.unwrap_or(now),
                scheduled_for: now,
                created_at: now,
            })
            .await?;

        let entry = AdmissionLogEntry {
            account_id: request.account_id,
            owner_id: request.owner_id,
            action: request.action.kind(),
            logged_at: now,
            remaining_calls: 0,
            status: AdmissionStatus::Queued,
            delay_ms: None,
        };
        // The item is already durable; an audit append failure must not undo
        // the enqueue.
        if let Err(error) = self.log.append(entry).await {
            warn!(
                queue_id = %item.id,
                error = %error,
                "failed to append queued admission log entry"
            );
        }

        Ok(EnqueueReceipt {
            queue_id: item.id,
            scheduled_for: item.scheduled_for,
        })
    }

    /// Returns one item by id.
    pub async fn find(&self, queue_id: Uuid) -> AppResult<Option<QueueItem>> {
        self.store.find(queue_id).await
    }

    /// Returns the next drainable items for the current window.
    pub async fn next_batch(&self, limit: usize) -> AppResult<Vec<QueueItem>> {
        if limit == 0 {
            return Err(AppError::Validation(
                "limit must be greater than zero".to_owned(),
            ));
        }

        let label = window_label_at(self.clock.now());
        self.store.next_batch(&label, limit).await
    }

    /// Claims one QUEUED item for processing with a bounded lease.
    pub async fn mark_processing(&self, queue_id: Uuid, lease_seconds: i64) -> AppResult<bool> {
        if lease_seconds <= 0 {
            return Err(AppError::Validation(
                "lease_seconds must be greater than zero".to_owned(),
            ));
        }

        let now = self.clock.now();
        self.store
            .mark_processing(queue_id, now, now + Duration::seconds(lease_seconds))
            .await
    }

    /// Finalizes one item as COMPLETED or FAILED.
    pub async fn update_status(
        &self,
        queue_id: Uuid,
        outcome: FinalizeOutcome,
    ) -> AppResult<QueueItem> {
        self.store.finalize(queue_id, outcome, self.clock.now()).await
    }

    /// Bumps the retry counter of one still-QUEUED item.
    pub async fn increment_retry(&self, queue_id: Uuid) -> AppResult<Option<i32>> {
        self.store.increment_retry(queue_id, self.clock.now()).await
    }

    /// Pulls QUEUED items from past windows into the current one.
    pub async fn promote_stale(&self) -> AppResult<u64> {
        let now = self.clock.now();
        self.store.promote_stale(&window_label_at(now), now).await
    }

    /// Requeues PROCESSING items whose claim lease has expired.
    pub async fn reclaim_expired(&self) -> AppResult<u64> {
        self.store.reclaim_expired(self.clock.now()).await
    }

    /// Returns aggregate counters, optionally scoped to one account.
    pub async fn stats(&self, account_id: Option<&AccountId>) -> AppResult<QueueStats> {
        self.store.stats(account_id).await
    }

    /// Purges terminal items older than the retention window.
    pub async fn cleanup(&self, retention_days: i64) -> AppResult<u64> {
        if retention_days < 1 {
            return Err(AppError::Validation(
                "retention_days must be at least one".to_owned(),
            ));
        }

        let cutoff = self.clock.now() - Duration::days(retention_days);
        self.store.delete_terminal_before(cutoff).await
    }
}
