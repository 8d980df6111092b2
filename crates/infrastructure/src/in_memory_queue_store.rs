//! In-memory durable-queue store used by tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use replygate_application::{
    FinalizeOutcome, NewQueueItem, QueueItem, QueueItemStatus, QueueStats, QueueStore,
};
use replygate_core::{AccountId, AppError, AppResult};

/// In-memory implementation of the queue store port.
#[derive(Default)]
pub struct InMemoryQueueStore {
    items: Mutex<Vec<QueueItem>>,
}

impl InMemoryQueueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, item: NewQueueItem) -> AppResult<QueueItem> {
        let mut items = self.items.lock().await;
        let position = items
            .iter()
            .filter(|existing| {
                existing.status == QueueItemStatus::Queued
                    && existing.window_label == item.window_label
            })
            .count() as i64
            + 1;

        let stored = QueueItem {
            id: item.id,
            account_id: item.account_id,
            owner_id: item.owner_id,
            action: item.action,
            priority: item.priority,
            status: QueueItemStatus::Queued,
            window_label: item.window_label,
            position,
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
        items.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, queue_id: Uuid) -> AppResult<Option<QueueItem>> {
        Ok(self
            .items
            .lock()
            .await
            .iter()
            .find(|item| item.id == queue_id)
            .cloned())
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
        batch.sort_by_key(|item| (item.priority, item.position, item.created_at));
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
        let mut items = self.items.lock().await;
        let mut next_position = items
            .iter()
            .filter(|item| {
                item.status == QueueItemStatus::Queued && item.window_label == current_label
            })
            .map(|item| item.position)
            .max()
            .unwrap_or(0);

        let mut stale: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.status == QueueItemStatus::Queued && item.window_label != current_label
            })
            .map(|(index, _)| index)
            .collect();
        stale.sort_by_key(|index| {
            let item = &items[*index];
            (item.priority, item.position, item.created_at)
        });

        let promoted = stale.len() as u64;
        for index in stale {
            next_position += 1;
            let item = &mut items[index];
            item.window_label = current_label.to_owned();
            item.position = next_position;
            item.updated_at = now;
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

    async fn stats(&self, account_id: Option<&AccountId>) -> AppResult<QueueStats> {
        let items = self.items.lock().await;
        let mut stats = QueueStats::default();
        let mut by_action: HashMap<String, i64> = HashMap::new();
        let mut by_window: HashMap<String, i64> = HashMap::new();
        let mut processing_ms: Vec<f64> = Vec::new();

        for item in items
            .iter()
            .filter(|item| account_id.is_none_or(|account| item.account_id == *account))
        {
            stats.total += 1;
            match item.status {
                QueueItemStatus::Queued => stats.queued += 1,
                QueueItemStatus::Processing => stats.processing += 1,
                QueueItemStatus::Completed => stats.completed += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
            *by_action
                .entry(item.action.kind().as_str().to_owned())
                .or_default() += 1;
            *by_window.entry(item.window_label.clone()).or_default() += 1;
            if item.status == QueueItemStatus::Completed
                && let Some(processed_at) = item.processed_at
            {
                processing_ms.push((processed_at - item.created_at).num_milliseconds() as f64);
            }
        }

        stats.by_action = by_action;
        stats.by_window = by_window;
        stats.avg_processing_ms = if processing_ms.is_empty() {
            None
        } else {
            Some(processing_ms.iter().sum::<f64>() / processing_ms.len() as f64)
        };
        Ok(stats)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| !(item.status.is_terminal() && item.created_at < cutoff));
        Ok((before - items.len()) as u64)
    }
}
