use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ReplyAction;

use super::service::{BatchProcessor, ProcessorConfig};
use crate::admission_log::{AccountUsage, AdmissionLogEntry, AdmissionLogStore};
use crate::clock::Clock;
use crate::executor::ActionExecutor;
use crate::queue::{
    FinalizeOutcome, NewQueueItem, QueueItem, QueueItemStatus, QueueService, QueueStats,
    QueueStore,
};
use crate::rate_limit::{
    AdmitOutcome, RateLimitPolicy, RateLimitRecord, RateLimitService, RateLimitStore,
};

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct FakeQueueStore {
    items: Mutex<Vec<QueueItem>>,
}

impl FakeQueueStore {
    async fn push(&self, item: QueueItem) {
        self.items.lock().await.push(item);
    }

    async fn get(&self, queue_id: Uuid) -> Option<QueueItem> {
        self.items
            .lock()
            .await
            .iter()
            .find(|item| item.id == queue_id)
            .cloned()
    }
}

#[async_trait]
impl QueueStore for FakeQueueStore {
    async fn insert(&self, item: NewQueueItem) -> AppResult<QueueItem> {
        let stored = QueueItem {
            id: item.id,
            account_id: item.account_id,
            owner_id: item.owner_id,
            action: item.action,
            priority: item.priority,
            status: QueueItemStatus::Queued,
            window_label: item.window_label,
            position: i64::try_from(self.items.lock().await.len()).unwrap_or(0) + 1,
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
        self.items.lock().await.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, queue_id: Uuid) -> AppResult<Option<QueueItem>> {
        Ok(self.get(queue_id).await)
    }

    async fn next_batch(&self, window_label: &str, limit: usize) -> AppResult<Vec<QueueItem>> {
        let mut batch: Vec<QueueItem> = self
            .items
            .lock()
            .await
            .iter()
            .filter(|item| {
                item.status == QueueItemStatus::Queued && item.window_label == window_label
            })
            .cloned()
            .collect();
        batch.sort_by_key(|item| (item.priority, item.position));
        batch.truncate(limit);
        Ok(batch)
    }

    async fn mark_processing(
        &self,
        queue_id: Uuid,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut items = self.items.lock().await;
        let Some(item) = items
            .iter_mut()
            .find(|item| item.id == queue_id && item.status == QueueItemStatus::Queued)
        else {
            return Ok(false);
        };
        item.status = QueueItemStatus::Processing;
        item.lease_expires_at = Some(lease_expires_at);
        item.updated_at = now;
        Ok(true)
    }

    async fn finalize(
        &self,
        queue_id: Uuid,
        outcome: FinalizeOutcome,
        now: DateTime<Utc>,
    ) -> AppResult<QueueItem> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == queue_id)
            .ok_or_else(|| AppError::NotFound(format!("queue item '{queue_id}'")))?;
        if item.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "queue item '{queue_id}' is already terminal"
            )));
        }

        match outcome {
            FinalizeOutcome::Completed { result } => {
                item.status = QueueItemStatus::Completed;
                item.result = Some(result);
                item.processed_at = Some(now);
            }
            FinalizeOutcome::Failed { error } => {
                item.status = QueueItemStatus::Failed;
                item.error = Some(error);
            }
        }
        item.lease_expires_at = None;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn increment_retry(
        &self,
        queue_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<i32>> {
        let mut items = self.items.lock().await;
        let Some(item) = items
            .iter_mut()
            .find(|item| item.id == queue_id && item.status == QueueItemStatus::Queued)
        else {
            return Ok(None);
        };
        item.retry_count += 1;
        item.updated_at = now;
        Ok(Some(item.retry_count))
    }

    async fn promote_stale(&self, current_label: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let mut promoted = 0;
        for item in self.items.lock().await.iter_mut() {
            if item.status == QueueItemStatus::Queued && item.window_label != current_label {
                item.window_label = current_label.to_owned();
                item.updated_at = now;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut reclaimed = 0;
        for item in self.items.lock().await.iter_mut() {
            if item.status == QueueItemStatus::Processing
                && item.lease_expires_at.is_some_and(|lease| lease < now)
            {
                item.status = QueueItemStatus::Queued;
                item.lease_expires_at = None;
                item.retry_count += 1;
                item.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn stats(&self, _account_id: Option<&AccountId>) -> AppResult<QueueStats> {
        Ok(QueueStats::default())
    }

    async fn delete_terminal_before(&self, _cutoff: DateTime<Utc>) -> AppResult<u64> {
        Ok(0)
    }
}

struct FakeRateLimitStore {
    denied_accounts: HashSet<String>,
}

#[async_trait]
impl RateLimitStore for FakeRateLimitStore {
    async fn try_admit(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        _policy: &RateLimitPolicy,
    ) -> AppResult<AdmitOutcome> {
        let record = RateLimitRecord {
            account_id: account_id.clone(),
            owner_id: owner_id.clone(),
            calls: 1,
            window_started_at: now,
            is_blocked: false,
            blocked_until: None,
        };
        if self.denied_accounts.contains(account_id.as_str()) {
            Ok(AdmitOutcome::Denied(record))
        } else {
            Ok(AdmitOutcome::Admitted(record))
        }
    }

    async fn find(&self, _account_id: &AccountId) -> AppResult<Option<RateLimitRecord>> {
        Ok(None)
    }

    async fn delete(&self, _account_id: &AccountId) -> AppResult<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct NullLogStore;

#[async_trait]
impl AdmissionLogStore for NullLogStore {
    async fn append(&self, _entry: AdmissionLogEntry) -> AppResult<()> {
        Ok(())
    }

    async fn top_accounts(&self, _limit: usize) -> AppResult<Vec<AccountUsage>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingExecutor {
    executed: Mutex<Vec<ReplyAction>>,
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &ReplyAction) -> AppResult<Value> {
        self.executed.lock().await.push(action.clone());
        let message = match action {
            ReplyAction::CommentReply { message, .. }
            | ReplyAction::DirectMessage { message, .. } => message,
        };
        if message.contains("boom") {
            return Err(AppError::Internal("platform returned 502".to_owned()));
        }
        Ok(json!({ "delivered": true }))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 3, 10, 30, 0)
        .single()
        .unwrap_or_default()
}

fn account(id: &str) -> AccountId {
    AccountId::new(id).unwrap_or_else(|_| unreachable!())
}

fn owner() -> OwnerId {
    OwnerId::new("owner-1").unwrap_or_else(|_| unreachable!())
}

fn queued_item(account_id: &str, priority: i32, position: i64, message: &str) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4(),
        account_id: account(account_id),
        owner_id: owner(),
        action: ReplyAction::CommentReply {
            comment_id: "c-1".to_owned(),
            message: message.to_owned(),
        },
        priority,
        status: QueueItemStatus::Queued,
        window_label: "10-11".to_owned(),
        position,
        original_timestamp: now(),
        retry_count: 0,
        result: None,
        error: None,
        scheduled_for: now(),
        lease_expires_at: None,
        created_at: now(),
        updated_at: now(),
        processed_at: None,
    }
}

struct Harness {
    store: Arc<FakeQueueStore>,
    executor: Arc<RecordingExecutor>,
    processor: BatchProcessor,
}

fn harness(denied_accounts: &[&str], config: ProcessorConfig) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
    let store = Arc::new(FakeQueueStore::default());
    let log = Arc::new(NullLogStore);
    let executor = Arc::new(RecordingExecutor::default());

    let queue = QueueService::new(store.clone(), log.clone(), clock.clone());
    let rate_limiter = RateLimitService::new(
        Arc::new(FakeRateLimitStore {
            denied_accounts: denied_accounts
                .iter()
                .map(|account| (*account).to_owned())
                .collect(),
        }),
        log,
        clock.clone(),
        RateLimitPolicy::default(),
    )
    .unwrap_or_else(|_| unreachable!());

    let processor = BatchProcessor::new(queue, rate_limiter, executor.clone(), clock, config)
        .unwrap_or_else(|_| unreachable!());

    Harness {
        store,
        executor,
        processor,
    }
}

#[tokio::test]
async fn denied_item_stays_queued_and_reappears_next_run() {
    let harness = harness(&["acct-limited"], ProcessorConfig::default());
    let item = queued_item("acct-limited", 3, 1, "hello");
    let queue_id = item.id;
    harness.store.push(item).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);

    let stored = harness.store.get(queue_id).await;
    assert_eq!(
        stored.as_ref().map(|item| item.status),
        Some(QueueItemStatus::Queued)
    );
    assert_eq!(stored.map(|item| item.retry_count), Some(1));

    // Still queued, so the next run sees it again.
    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.skipped, 1);
    let stored = harness.store.get(queue_id).await;
    assert_eq!(stored.map(|item| item.retry_count), Some(2));
}

#[tokio::test]
async fn admitted_item_executes_and_completes() {
    let harness = harness(&[], ProcessorConfig::default());
    let item = queued_item("acct-1", 3, 1, "thanks!");
    let queue_id = item.id;
    harness.store.push(item).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);

    let stored = harness.store.get(queue_id).await;
    assert_eq!(
        stored.as_ref().map(|item| item.status),
        Some(QueueItemStatus::Completed)
    );
    assert_eq!(
        stored.as_ref().and_then(|item| item.result.clone()),
        Some(json!({ "delivered": true }))
    );
    assert!(stored.is_some_and(|item| item.processed_at.is_some()));
}

#[tokio::test]
async fn failing_action_does_not_abort_siblings() {
    let harness = harness(&[], ProcessorConfig::default());
    let failing = queued_item("acct-1", 1, 1, "boom");
    let healthy = queued_item("acct-2", 2, 2, "all good");
    let failing_id = failing.id;
    let healthy_id = healthy.id;
    harness.store.push(failing).await;
    harness.store.push(healthy).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let failed = harness.store.get(failing_id).await;
    assert_eq!(
        failed.as_ref().map(|item| item.status),
        Some(QueueItemStatus::Failed)
    );
    assert!(
        failed
            .and_then(|item| item.error)
            .is_some_and(|error| error.contains("502"))
    );

    let completed = harness.store.get(healthy_id).await;
    assert_eq!(
        completed.map(|item| item.status),
        Some(QueueItemStatus::Completed)
    );
}

#[tokio::test]
async fn lower_priority_number_drains_first() {
    let harness = harness(&[], ProcessorConfig::default());
    // Insert the less urgent item first; priority must win over insertion
    // order.
    harness.store.push(queued_item("acct-1", 5, 1, "later")).await;
    harness
        .store
        .push(queued_item("acct-1", 1, 2, "urgent"))
        .await;

    harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());

    let executed = harness.executor.executed.lock().await;
    let messages: Vec<&str> = executed
        .iter()
        .map(|action| match action {
            ReplyAction::CommentReply { message, .. }
            | ReplyAction::DirectMessage { message, .. } => message.as_str(),
        })
        .collect();
    assert_eq!(messages, ["urgent", "later"]);
}

#[tokio::test]
async fn retry_cap_fails_item_out() {
    let config = ProcessorConfig {
        max_retries: 2,
        ..ProcessorConfig::default()
    };
    let harness = harness(&["acct-limited"], config);
    let mut item = queued_item("acct-limited", 3, 1, "hello");
    item.retry_count = 2;
    let queue_id = item.id;
    harness.store.push(item).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.retry_capped, 1);
    assert_eq!(summary.skipped, 0);

    let stored = harness.store.get(queue_id).await;
    assert_eq!(
        stored.as_ref().map(|item| item.status),
        Some(QueueItemStatus::Failed)
    );
    assert_eq!(
        stored.and_then(|item| item.error),
        Some("retry limit exceeded".to_owned())
    );
}

#[tokio::test]
async fn past_window_items_are_promoted_then_drained() {
    let harness = harness(&[], ProcessorConfig::default());
    let mut stale = queued_item("acct-1", 3, 1, "from last night");
    stale.window_label = "22-23".to_owned();
    let queue_id = stale.id;
    harness.store.push(stale).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.promoted, 1);
    assert_eq!(summary.succeeded, 1);

    let stored = harness.store.get(queue_id).await;
    assert_eq!(
        stored.map(|item| item.window_label),
        Some("10-11".to_owned())
    );
}

#[tokio::test]
async fn already_claimed_item_is_skipped() {
    let harness = harness(&[], ProcessorConfig::default());
    let mut claimed = queued_item("acct-1", 3, 1, "in flight");
    claimed.status = QueueItemStatus::Processing;
    claimed.lease_expires_at = Some(now() + chrono::Duration::seconds(60));
    harness.store.push(claimed).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    // Not part of the QUEUED batch at all.
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 0);
}

#[tokio::test]
async fn expired_lease_is_reclaimed_and_re_executed() {
    let harness = harness(&[], ProcessorConfig::default());
    let mut orphaned = queued_item("acct-1", 3, 1, "crashed run");
    orphaned.status = QueueItemStatus::Processing;
    orphaned.lease_expires_at = Some(now() - chrono::Duration::seconds(30));
    let queue_id = orphaned.id;
    harness.store.push(orphaned).await;

    let summary = harness
        .processor
        .process_batch()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.succeeded, 1);

    let stored = harness.store.get(queue_id).await;
    assert_eq!(
        stored.as_ref().map(|item| item.status),
        Some(QueueItemStatus::Completed)
    );
    assert_eq!(stored.map(|item| item.retry_count), Some(1));
}
