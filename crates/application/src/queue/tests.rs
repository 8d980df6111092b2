use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ReplyAction;

use super::ports::QueueStore;
use super::service::{DEFAULT_PRIORITY, EnqueueRequest, QueueService};
use super::types::{FinalizeOutcome, NewQueueItem, QueueItem, QueueItemStatus, QueueStats};
use crate::admission_log::{AccountUsage, AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
use crate::clock::Clock;

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct RecordingQueueStore {
    inserted: Mutex<Vec<NewQueueItem>>,
    batch_requests: Mutex<Vec<(String, usize)>>,
    cleanup_cutoffs: Mutex<Vec<DateTime<Utc>>>,
}

#[async_trait]
impl QueueStore for RecordingQueueStore {
    async fn insert(&self, item: NewQueueItem) -> AppResult<QueueItem> {
        let stored = QueueItem {
            id: item.id,
            account_id: item.account_id.clone(),
            owner_id: item.owner_id.clone(),
            action: item.action.clone(),
            priority: item.priority,
            status: QueueItemStatus::Queued,
            window_label: item.window_label.clone(),
            position: 1,
            original_timestamp: item.original_timestamp,
            retry_count: 0,
            result: None,
            error: None,
            scheduled_for: item.scheduled_for,
            lease_expires_at: None,
            created_at: item.created_at,
            updated_at: item.created_at,
            processed_at: None,
        };
        self.inserted.lock().await.push(item);
        Ok(stored)
    }

    async fn find(&self, _queue_id: Uuid) -> AppResult<Option<QueueItem>> {
        Ok(None)
    }

    async fn next_batch(&self, window_label: &str, limit: usize) -> AppResult<Vec<QueueItem>> {
        self.batch_requests
            .lock()
            .await
            .push((window_label.to_owned(), limit));
        Ok(Vec::new())
    }

    async fn mark_processing(
        &self,
        _queue_id: Uuid,
        _now: DateTime<Utc>,
        _lease_expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(true)
    }

    async fn finalize(
        &self,
        queue_id: Uuid,
        _outcome: FinalizeOutcome,
        _now: DateTime<Utc>,
    ) -> AppResult<QueueItem> {
        Err(AppError::NotFound(format!("queue item '{queue_id}'")))
    }

    async fn increment_retry(
        &self,
        _queue_id: Uuid,
        _now: DateTime<Utc>,
    ) -> AppResult<Option<i32>> {
        Ok(Some(1))
    }

    async fn promote_stale(&self, _current_label: &str, _now: DateTime<Utc>) -> AppResult<u64> {
        Ok(0)
    }

    async fn reclaim_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        Ok(0)
    }

    async fn stats(&self, _account_id: Option<&AccountId>) -> AppResult<QueueStats> {
        Ok(QueueStats::default())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.cleanup_cutoffs.lock().await.push(cutoff);
        Ok(3)
    }
}

#[derive(Default)]
struct RecordingLogStore {
    entries: Mutex<Vec<AdmissionLogEntry>>,
}

#[async_trait]
impl AdmissionLogStore for RecordingLogStore {
    async fn append(&self, entry: AdmissionLogEntry) -> AppResult<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn top_accounts(&self, _limit: usize) -> AppResult<Vec<AccountUsage>> {
        Ok(Vec::new())
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 3, 9, 15, 0)
        .single()
        .unwrap_or_default()
}

fn request() -> EnqueueRequest {
    EnqueueRequest {
        account_id: AccountId::new("acct-1").unwrap_or_else(|_| unreachable!()),
        owner_id: OwnerId::new("owner-1").unwrap_or_else(|_| unreachable!()),
        action: ReplyAction::CommentReply {
            comment_id: "c-9".to_owned(),
            message: "appreciate the feedback!".to_owned(),
        },
        priority: None,
        original_timestamp: None,
    }
}

fn service(
    store: Arc<RecordingQueueStore>,
    log: Arc<RecordingLogStore>,
) -> QueueService {
    QueueService::new(store, log, Arc::new(FixedClock(now())))
}

#[tokio::test]
async fn enqueue_defaults_priority_and_window_label() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store.clone(), log.clone());

    let receipt = service
        .enqueue(request())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(receipt.scheduled_for, now());

    let inserted = store.inserted.lock().await;
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].priority, DEFAULT_PRIORITY);
    assert_eq!(inserted[0].window_label, "9-10");
    assert_eq!(inserted[0].original_timestamp, now());

    let entries = log.entries.lock().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AdmissionStatus::Queued);
}

#[tokio::test]
async fn enqueue_rejects_blank_action_message() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store.clone(), log);

    let mut invalid = request();
    invalid.action = ReplyAction::DirectMessage {
        recipient_id: "u-1".to_owned(),
        message: String::new(),
    };

    assert!(service.enqueue(invalid).await.is_err());
    assert!(store.inserted.lock().await.is_empty());
}

#[tokio::test]
async fn enqueue_rejects_out_of_range_priority() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store, log);

    let mut invalid = request();
    invalid.priority = Some(-1);

    assert!(service.enqueue(invalid).await.is_err());
}

#[tokio::test]
async fn next_batch_targets_the_current_window() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store.clone(), log);

    let batch = service
        .next_batch(25)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(batch.is_empty());

    let requests = store.batch_requests.lock().await;
    assert_eq!(requests.as_slice(), &[("9-10".to_owned(), 25)]);
}

#[tokio::test]
async fn next_batch_rejects_zero_limit() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store, log);

    assert!(service.next_batch(0).await.is_err());
}

#[tokio::test]
async fn cleanup_uses_retention_cutoff() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store.clone(), log);

    let deleted = service.cleanup(7).await.unwrap_or(0);
    assert_eq!(deleted, 3);

    let cutoffs = store.cleanup_cutoffs.lock().await;
    assert_eq!(cutoffs.as_slice(), &[now() - chrono::Duration::days(7)]);
}

#[tokio::test]
async fn cleanup_rejects_zero_retention() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store, log);

    assert!(service.cleanup(0).await.is_err());
}

#[tokio::test]
async fn finalize_error_carries_item_id() {
    let store = Arc::new(RecordingQueueStore::default());
    let log = Arc::new(RecordingLogStore::default());
    let service = service(store, log);

    let queue_id = Uuid::new_v4();
    let result = service
        .update_status(
            queue_id,
            FinalizeOutcome::Completed {
                result: json!({"ok": true}),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}
