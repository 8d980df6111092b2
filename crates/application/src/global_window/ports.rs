use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replygate_core::{AppError, AppResult};

/// Lifecycle of one global hour window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalWindowStatus {
    /// Window is open for admissions.
    Active,
    /// Queue processing has started reporting into the window.
    Processing,
    /// Window has ended; read-only.
    Completed,
}

impl GlobalWindowStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            _ => Err(AppError::Validation(format!(
                "unknown global window status '{value}'"
            ))),
        }
    }
}

/// One application-wide hour window counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalWindow {
    /// Hour-aligned window start.
    pub window_started_at: DateTime<Utc>,
    /// Window end (start + 1 hour).
    pub window_ends_at: DateTime<Utc>,
    /// Admitted calls across all accounts in the window.
    pub global_calls: i64,
    /// Application-wide ceiling for the window.
    pub app_limit: i64,
    /// Accounts the processor reported as drained in the window.
    pub accounts_processed: i64,
    /// Window lifecycle state.
    pub status: GlobalWindowStatus,
}

/// Store port for the global window counter.
#[async_trait]
pub trait GlobalWindowStore: Send + Sync {
    /// Atomically increments `global_calls` for the given window, bounded by
    /// `app_limit`. Creates the window on first use. Returns the updated
    /// window, or `None` when the ceiling is already reached — the increment
    /// and the bound check must be one store-level operation.
    async fn try_increment(
        &self,
        window_started_at: DateTime<Utc>,
        window_ends_at: DateTime<Utc>,
        app_limit: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<GlobalWindow>>;

    /// Returns one window by its start instant.
    async fn find(&self, window_started_at: DateTime<Utc>) -> AppResult<Option<GlobalWindow>>;

    /// Adds to the processor-reported account count for one window.
    async fn add_accounts_processed(
        &self,
        window_started_at: DateTime<Utc>,
        accounts: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Marks windows that ended before `now` as completed.
    async fn finalize_ended(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
