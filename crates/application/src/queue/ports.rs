use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use replygate_core::{AccountId, AppResult};

use super::types::{FinalizeOutcome, NewQueueItem, QueueItem, QueueStats};

/// Store port for the durable deferred-action queue.
///
/// The QUEUED→PROCESSING transition and the terminal transitions are
/// conditional store-level operations so overlapping processor runs can
/// never execute the same item twice or rewrite terminal history.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists one new QUEUED item, assigning `position` as one past the
    /// count of QUEUED items already in the same window.
    async fn insert(&self, item: NewQueueItem) -> AppResult<QueueItem>;

    /// Returns one item by id.
    async fn find(&self, queue_id: Uuid) -> AppResult<Option<QueueItem>>;

    /// Returns up to `limit` QUEUED items in the given window, ordered by
    /// `(priority, position)` ascending. Never crosses window labels.
    async fn next_batch(&self, window_label: &str, limit: usize) -> AppResult<Vec<QueueItem>>;

    /// Conditionally claims one QUEUED item for processing, stamping a lease
    /// expiry. Returns `false` when the item is no longer QUEUED.
    async fn mark_processing(
        &self,
        queue_id: Uuid,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Moves one non-terminal item to COMPLETED or FAILED. Finalizing an
    /// already-terminal item is a conflict, never an overwrite.
    async fn finalize(
        &self,
        queue_id: Uuid,
        outcome: FinalizeOutcome,
        now: DateTime<Utc>,
    ) -> AppResult<QueueItem>;

    /// Bumps the deferred-admission retry counter of one QUEUED item.
    /// Returns the new count, or `None` when the item is no longer QUEUED.
    async fn increment_retry(&self, queue_id: Uuid, now: DateTime<Utc>)
    -> AppResult<Option<i32>>;

    /// Relabels QUEUED items from past windows into `current_label`,
    /// appending their positions after the window's current tail. Returns
    /// how many items moved.
    async fn promote_stale(&self, current_label: &str, now: DateTime<Utc>) -> AppResult<u64>;

    /// Returns PROCESSING items with an expired lease to QUEUED, bumping
    /// their retry counter. Returns how many items were reclaimed.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Returns aggregate counters, optionally scoped to one account.
    async fn stats(&self, account_id: Option<&AccountId>) -> AppResult<QueueStats>;

    /// Deletes terminal items created before the cutoff. QUEUED and
    /// PROCESSING items are never deleted regardless of age.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}
