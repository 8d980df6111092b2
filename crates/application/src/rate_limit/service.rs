use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use replygate_core::{AccountId, AppError, AppResult, OwnerId};
use replygate_domain::ActionKind;

use super::policy::RateLimitPolicy;
use super::ports::{AdmitOutcome, RateLimitRecord, RateLimitStore};
use crate::admission_log::{AccountUsage, AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
use crate::clock::{Clock, hour_floor};
use crate::global_window::GlobalWindowService;

/// Answer to one "may I call now?" question.
///
/// Denial is a normal value; the service only errors when the backing store
/// is unreachable, and callers must then fail closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether the caller may perform the action now.
    pub allowed: bool,
    /// Calls left in the account window.
    pub remaining_calls: i32,
    /// Whether a soft block is armed.
    pub is_blocked: bool,
    /// Block expiry, when armed.
    pub blocked_until: Option<DateTime<Utc>>,
    /// Suggested wait before retrying, for denied calls.
    pub delay_ms: Option<i64>,
}

/// Read-only projection of one account's admission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    /// Account identifier.
    pub account_id: AccountId,
    /// Admitted calls in the current window.
    pub calls: i32,
    /// Calls left before the hard ceiling.
    pub remaining_calls: i32,
    /// Whether a soft block is in effect.
    pub is_blocked: bool,
    /// Block expiry, when in effect.
    pub blocked_until: Option<DateTime<Utc>>,
    /// Window start, absent for accounts that never called.
    pub window_started_at: Option<DateTime<Utc>>,
    /// Milliseconds until the window resets.
    pub reset_in_ms: i64,
}

/// Application service for per-account admission control.
#[derive(Clone)]
pub struct RateLimitService {
    store: Arc<dyn RateLimitStore>,
    log: Arc<dyn AdmissionLogStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
    global_window: Option<GlobalWindowService>,
}

impl RateLimitService {
    /// Creates a service with a validated policy.
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        log: Arc<dyn AdmissionLogStore>,
        clock: Arc<dyn Clock>,
        policy: RateLimitPolicy,
    ) -> AppResult<Self> {
        policy.validate()?;

        Ok(Self {
            store,
            log,
            clock,
            policy,
            global_window: None,
        })
    }

    /// Enables the application-wide quota tier on top of per-account checks.
    #[must_use]
    pub fn with_global_window(mut self, global_window: GlobalWindowService) -> Self {
        self.global_window = Some(global_window);
        self
    }

    /// Returns the active policy.
    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Decides whether one action may run now, consuming budget when it may.
    pub async fn check_admission(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        action: ActionKind,
    ) -> AppResult<AdmissionDecision> {
        let now = self.clock.now();
        let outcome = self
            .store
            .try_admit(account_id, owner_id, now, &self.policy)
            .await?;

        let decision = match outcome {
            AdmitOutcome::Admitted(record) => {
                if let Some(global_window) = &self.global_window
                    && !global_window.try_admit_global(now).await?
                {
                    // The shared app ceiling is exhausted; the per-account
                    // increment stands and the caller waits out the hour.
                    let delay_ms = (hour_floor(now) + Duration::hours(1) - now)
                        .num_milliseconds()
                        .max(0);
                    let decision = self.denied_decision(&record, now, Some(delay_ms));
                    self.append_log(account_id, owner_id, action, now, &decision)
                        .await;
                    return Ok(decision);
                }

                AdmissionDecision {
                    allowed: true,
                    remaining_calls: self.remaining(record.calls),
                    is_blocked: record.block_active(now),
                    blocked_until: record.blocked_until,
                    delay_ms: None,
                }
            }
            AdmitOutcome::Denied(record) => {
                let delay_ms = record
                    .blocked_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).num_milliseconds());
                self.denied_decision(&record, now, delay_ms)
            }
        };

        self.append_log(account_id, owner_id, action, now, &decision)
            .await;
        Ok(decision)
    }

    /// Returns the account's state with expired windows projected as reset.
    pub async fn account_status(&self, account_id: &AccountId) -> AppResult<AccountStatus> {
        let now = self.clock.now();
        let Some(record) = self.store.find(account_id).await? else {
            return Ok(AccountStatus {
                account_id: account_id.clone(),
                calls: 0,
                remaining_calls: self.policy.hard_limit,
                is_blocked: false,
                blocked_until: None,
                window_started_at: None,
                reset_in_ms: 0,
            });
        };

        if record.window_expired(now, self.policy.window_seconds) {
            return Ok(AccountStatus {
                account_id: account_id.clone(),
                calls: 0,
                remaining_calls: self.policy.hard_limit,
                is_blocked: false,
                blocked_until: None,
                window_started_at: Some(record.window_started_at),
                reset_in_ms: 0,
            });
        }

        let reset_in_ms = (record.window_started_at + Duration::seconds(self.policy.window_seconds)
            - now)
            .num_milliseconds()
            .max(0);

        Ok(AccountStatus {
            account_id: account_id.clone(),
            calls: record.calls,
            remaining_calls: self.remaining(record.calls),
            is_blocked: record.block_active(now),
            blocked_until: record.blocked_until,
            window_started_at: Some(record.window_started_at),
            reset_in_ms,
        })
    }

    /// Administrative override: drops the account's counter and block state.
    pub async fn reset_account(&self, account_id: &AccountId) -> AppResult<()> {
        self.store.delete(account_id).await?;
        Ok(())
    }

    /// Returns the heaviest callers on record.
    pub async fn top_accounts(&self, limit: usize) -> AppResult<Vec<AccountUsage>> {
        if limit == 0 {
            return Err(AppError::Validation(
                "limit must be greater than zero".to_owned(),
            ));
        }

        self.log.top_accounts(limit).await
    }

    fn remaining(&self, calls: i32) -> i32 {
        (self.policy.hard_limit - calls).max(0)
    }

    fn denied_decision(
        &self,
        record: &RateLimitRecord,
        now: DateTime<Utc>,
        delay_ms: Option<i64>,
    ) -> AdmissionDecision {
        AdmissionDecision {
            allowed: false,
            remaining_calls: self.remaining(record.calls),
            is_blocked: record.block_active(now),
            blocked_until: record.blocked_until,
            delay_ms,
        }
    }

    async fn append_log(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        action: ActionKind,
        now: DateTime<Utc>,
        decision: &AdmissionDecision,
    ) {
        let status = if decision.allowed {
            AdmissionStatus::Success
        } else {
            AdmissionStatus::RateLimited
        };
        let entry = AdmissionLogEntry {
            account_id: account_id.clone(),
            owner_id: owner_id.clone(),
            action,
            logged_at: now,
            remaining_calls: decision.remaining_calls,
            status,
            delay_ms: decision.delay_ms,
        };

        // The audit log is observability-only; a failed append must not turn
        // an otherwise sound decision into an error.
        if let Err(error) = self.log.append(entry).await {
            warn!(
                account_id = %account_id,
                status = status.as_str(),
                error = %error,
                "failed to append admission log entry"
            );
        }
    }
}
