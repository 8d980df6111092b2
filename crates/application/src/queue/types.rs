use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ReplyAction;

/// Queue item lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting to be drained.
    Queued,
    /// Claimed by one processor run.
    Processing,
    /// Executed successfully; terminal.
    Completed,
    /// Execution failed or retries were exhausted; terminal.
    Failed,
}

impl QueueItemStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown queue item status '{value}'"
            ))),
        }
    }

    /// True for states that accept no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One persisted deferred action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    /// Stable item identifier.
    pub id: Uuid,
    /// Account the action runs for.
    pub account_id: AccountId,
    /// Owner of the account.
    pub owner_id: OwnerId,
    /// The deferred action; opaque to queue logic.
    pub action: ReplyAction,
    /// Drain priority; lower is more urgent.
    pub priority: i32,
    /// Lifecycle state.
    pub status: QueueItemStatus,
    /// Hour bucket the item is drained in.
    pub window_label: String,
    /// FIFO tie-breaker inside one window.
    pub position: i64,
    /// When the caller originally attempted the action.
    pub original_timestamp: DateTime<Utc>,
    /// Deferred-admission retries so far.
    pub retry_count: i32,
    /// Execution result, set on completion.
    pub result: Option<Value>,
    /// Failure details, set on failure.
    pub error: Option<String>,
    /// When the item became eligible for processing.
    pub scheduled_for: DateTime<Utc>,
    /// Claim lease expiry while processing.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Successful execution time.
    pub processed_at: Option<DateTime<Utc>>,
}

/// Insert payload handed to the store; `position` is assigned store-side.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    /// Stable item identifier.
    pub id: Uuid,
    /// Account the action runs for.
    pub account_id: AccountId,
    /// Owner of the account.
    pub owner_id: OwnerId,
    /// The deferred action.
    pub action: ReplyAction,
    /// Drain priority; lower is more urgent.
    pub priority: i32,
    /// Hour bucket derived from enqueue time.
    pub window_label: String,
    /// When the caller originally attempted the action.
    pub original_timestamp: DateTime<Utc>,
    /// When the item becomes eligible for processing.
    pub scheduled_for: DateTime<Utc>,
    /// Enqueue instant.
    pub created_at: DateTime<Utc>,
}

/// Receipt returned to the caller after a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    /// Identifier of the queued item.
    pub queue_id: Uuid,
    /// When the item becomes eligible for processing.
    pub scheduled_for: DateTime<Utc>,
}

/// Terminal transition payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// Execution succeeded.
    Completed {
        /// Execution result captured on the item.
        result: Value,
    },
    /// Execution failed or retries were exhausted.
    Failed {
        /// Failure details captured on the item.
        error: String,
    },
}

/// Aggregate queue counters for operations visibility.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueueStats {
    /// All items on record.
    pub total: i64,
    /// Items waiting to be drained.
    pub queued: i64,
    /// Items claimed by a processor run.
    pub processing: i64,
    /// Items executed successfully.
    pub completed: i64,
    /// Items that failed.
    pub failed: i64,
    /// Item counts by action kind.
    pub by_action: HashMap<String, i64>,
    /// Item counts by window label.
    pub by_window: HashMap<String, i64>,
    /// Mean queue-to-completion latency over completed items.
    pub avg_processing_ms: Option<f64>,
}
