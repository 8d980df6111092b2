//! In-memory per-account admission store.
//!
//! Reference implementation of the admission branch: everything happens
//! under one lock, which gives the same atomicity the SQL and Lua variants
//! get from their single guarded statements. Used by tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use replygate_application::{AdmitOutcome, RateLimitPolicy, RateLimitRecord, RateLimitStore};
use replygate_core::{AccountId, AppResult, OwnerId};

/// In-memory implementation of the rate limit store port.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    records: Mutex<HashMap<AccountId, RateLimitRecord>>,
}

impl InMemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one record directly, for tests that need a prepared window.
    pub async fn seed(&self, record: RateLimitRecord) {
        self.records
            .lock()
            .await
            .insert(record.account_id.clone(), record);
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn try_admit(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<AdmitOutcome> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(account_id.clone())
            .or_insert_with(|| RateLimitRecord {
                account_id: account_id.clone(),
                owner_id: owner_id.clone(),
                calls: 0,
                window_started_at: now,
                is_blocked: false,
                blocked_until: None,
            });

        // Window expiry resolves before anything else.
        if record.window_expired(now, policy.window_seconds) {
            record.calls = 0;
            record.window_started_at = now;
            record.is_blocked = false;
            record.blocked_until = None;
        }

        if record.block_active(now) {
            return Ok(AdmitOutcome::Denied(record.clone()));
        }

        // The soft block arms once per window; `is_blocked` stays set after
        // expiry so the account climbs toward the hard ceiling without
        // re-arming.
        if !record.is_blocked && record.calls >= policy.block_threshold {
            record.is_blocked = true;
            record.blocked_until = Some(now + Duration::seconds(policy.block_seconds));
            return Ok(AdmitOutcome::Denied(record.clone()));
        }

        if record.calls >= policy.hard_limit {
            return Ok(AdmitOutcome::Denied(record.clone()));
        }

        record.calls += 1;
        if !record.is_blocked && record.calls >= policy.block_threshold {
            record.is_blocked = true;
            record.blocked_until = Some(now + Duration::seconds(policy.block_seconds));
        }

        Ok(AdmitOutcome::Admitted(record.clone()))
    }

    async fn find(&self, account_id: &AccountId) -> AppResult<Option<RateLimitRecord>> {
        Ok(self.records.lock().await.get(account_id).cloned())
    }

    async fn delete(&self, account_id: &AccountId) -> AppResult<bool> {
        Ok(self.records.lock().await.remove(account_id).is_some())
    }
}
