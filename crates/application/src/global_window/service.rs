use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use replygate_core::{AppError, AppResult};

use super::ports::{GlobalWindow, GlobalWindowStore};
use crate::clock::hour_floor;

/// Application service for the shared hourly quota window.
///
/// Protects the provider's app-level ceiling: many accounts can each stay
/// under their own budget while collectively exceeding the shared one.
#[derive(Clone)]
pub struct GlobalWindowService {
    store: Arc<dyn GlobalWindowStore>,
    app_limit: i64,
}

impl GlobalWindowService {
    /// Creates a service enforcing the given application-wide hourly limit.
    pub fn new(store: Arc<dyn GlobalWindowStore>, app_limit: i64) -> AppResult<Self> {
        if app_limit < 1 {
            return Err(AppError::Validation(
                "app_limit must be greater than zero".to_owned(),
            ));
        }

        Ok(Self { store, app_limit })
    }

    /// Consumes one unit of the shared hourly budget.
    ///
    /// Returns `false` when the current window is exhausted; the caller must
    /// treat that as a denial even if the account's own window has headroom.
    pub async fn try_admit_global(&self, now: DateTime<Utc>) -> AppResult<bool> {
        let window_started_at = hour_floor(now);
        let window_ends_at = window_started_at + Duration::hours(1);
        let window = self
            .store
            .try_increment(window_started_at, window_ends_at, self.app_limit, now)
            .await?;

        Ok(window.is_some())
    }

    /// Returns the window covering `now`, if any admissions created it.
    pub async fn current_window(&self, now: DateTime<Utc>) -> AppResult<Option<GlobalWindow>> {
        self.store.find(hour_floor(now)).await
    }

    /// Records how many accounts the processor drained in the current window.
    pub async fn record_accounts_processed(
        &self,
        now: DateTime<Utc>,
        accounts: i64,
    ) -> AppResult<()> {
        if accounts <= 0 {
            return Ok(());
        }

        self.store
            .add_accounts_processed(hour_floor(now), accounts, now)
            .await
    }

    /// Marks windows that have ended as completed. Intended for the
    /// low-frequency maintenance trigger.
    pub async fn finalize_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.store.finalize_ended(now).await
    }
}
