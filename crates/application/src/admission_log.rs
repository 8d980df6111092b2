use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ActionKind;

/// Outcome category recorded for one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// The call was admitted.
    Success,
    /// The call was denied by the rate limiter.
    RateLimited,
    /// The action was deferred onto the queue after a denial.
    Queued,
}

impl AdmissionStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Queued => "queued",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "success" => Ok(Self::Success),
            "rate_limited" => Ok(Self::RateLimited),
            "queued" => Ok(Self::Queued),
            _ => Err(AppError::Validation(format!(
                "unknown admission status '{value}'"
            ))),
        }
    }
}

/// One immutable admission audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionLogEntry {
    /// Account the decision applied to.
    pub account_id: AccountId,
    /// Owner of the account.
    pub owner_id: OwnerId,
    /// Action kind that was checked.
    pub action: ActionKind,
    /// Decision timestamp.
    pub logged_at: DateTime<Utc>,
    /// Calls left in the account window after the decision.
    pub remaining_calls: i32,
    /// Decision outcome.
    pub status: AdmissionStatus,
    /// Wait hint for denied calls, when a block is active.
    pub delay_ms: Option<i64>,
}

/// Per-account admitted-call total, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUsage {
    /// Account identifier.
    pub account_id: AccountId,
    /// Total admitted calls on record.
    pub total_calls: i64,
}

/// Append-only store port for admission audit records.
#[async_trait]
pub trait AdmissionLogStore: Send + Sync {
    /// Appends one entry. Entries are never updated or read back by the core.
    async fn append(&self, entry: AdmissionLogEntry) -> AppResult<()>;

    /// Returns the accounts with the most admitted calls, descending.
    async fn top_accounts(&self, limit: usize) -> AppResult<Vec<AccountUsage>>;
}
