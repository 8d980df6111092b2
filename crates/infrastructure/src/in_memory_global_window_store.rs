//! In-memory global quota window store used by tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use replygate_application::{GlobalWindow, GlobalWindowStatus, GlobalWindowStore};
use replygate_core::AppResult;

/// In-memory implementation of the global window store port.
#[derive(Default)]
pub struct InMemoryGlobalWindowStore {
    windows: Mutex<Vec<GlobalWindow>>,
}

impl InMemoryGlobalWindowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GlobalWindowStore for InMemoryGlobalWindowStore {
    async fn try_increment(
        &self,
        window_started_at: DateTime<Utc>,
        window_ends_at: DateTime<Utc>,
        app_limit: i64,
        _now: DateTime<Utc>,
    ) -> AppResult<Option<GlobalWindow>> {
        let mut windows = self.windows.lock().await;
        if let Some(window) = windows
            .iter_mut()
            .find(|window| window.window_started_at == window_started_at)
        {
            if window.global_calls >= window.app_limit
                || window.status == GlobalWindowStatus::Completed
            {
                return Ok(None);
            }
            window.global_calls += 1;
            return Ok(Some(window.clone()));
        }

        let window = GlobalWindow {
            window_started_at,
            window_ends_at,
            global_calls: 1,
            app_limit,
            accounts_processed: 0,
            status: GlobalWindowStatus::Active,
        };
        windows.push(window.clone());
        Ok(Some(window))
    }

    async fn find(&self, window_started_at: DateTime<Utc>) -> AppResult<Option<GlobalWindow>> {
        Ok(self
            .windows
            .lock()
            .await
            .iter()
            .find(|window| window.window_started_at == window_started_at)
            .cloned())
    }

    async fn add_accounts_processed(
        &self,
        window_started_at: DateTime<Utc>,
        accounts: i64,
        _now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut windows = self.windows.lock().await;
        if let Some(window) = windows.iter_mut().find(|window| {
            window.window_started_at == window_started_at
                && window.status != GlobalWindowStatus::Completed
        }) {
            window.accounts_processed += accounts;
            if window.status == GlobalWindowStatus::Active {
                window.status = GlobalWindowStatus::Processing;
            }
        }
        Ok(())
    }

    async fn finalize_ended(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut finalized = 0;
        for window in self.windows.lock().await.iter_mut() {
            if window.window_ends_at <= now && window.status != GlobalWindowStatus::Completed {
                window.status = GlobalWindowStatus::Completed;
                finalized += 1;
            }
        }
        Ok(finalized)
    }
}
