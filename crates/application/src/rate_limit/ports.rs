use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use replygate_core::{AccountId, AppResult, OwnerId};

use super::policy::RateLimitPolicy;

/// Per-account call counter and block state for one rolling window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Account the counter belongs to.
    pub account_id: AccountId,
    /// Owner of the account.
    pub owner_id: OwnerId,
    /// Admitted calls since `window_started_at`.
    pub calls: i32,
    /// Start of the account's rolling window.
    pub window_started_at: DateTime<Utc>,
    /// Whether a soft block has been armed this window.
    pub is_blocked: bool,
    /// Block expiry, when armed.
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    /// True when the rolling window has elapsed and the record must be
    /// treated as reset before further use.
    #[must_use]
    pub fn window_expired(&self, now: DateTime<Utc>, window_seconds: i64) -> bool {
        now - self.window_started_at >= Duration::seconds(window_seconds)
    }

    /// True while an armed block is still in effect.
    #[must_use]
    pub fn block_active(&self, now: DateTime<Utc>) -> bool {
        self.is_blocked && self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Result of one atomic admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The call was admitted; the record reflects the incremented counter.
    Admitted(RateLimitRecord),
    /// The call was denied; the record reflects current state, including a
    /// block armed by this attempt.
    Denied(RateLimitRecord),
}

/// Store port for per-account admission state.
///
/// Implementations must make `try_admit` a store-level conditional
/// increment: concurrent callers racing on the same account may never both
/// observe headroom and both increment. Read-then-write in application code
/// is a contract violation, not an optimization choice.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Runs one admission attempt for the account:
    ///
    /// - creates the record on first use (one admitted call),
    /// - resets an expired window before evaluating anything else,
    /// - denies while an armed block is in effect,
    /// - at or above `block_threshold` with no block armed yet this window,
    ///   arms the block and denies,
    /// - at or above `hard_limit`, denies without arming,
    /// - otherwise increments; reaching `block_threshold` on this increment
    ///   still admits the call and arms the block for subsequent ones.
    ///
    /// The soft block arms at most once per window: after it expires the
    /// account climbs toward `hard_limit` without re-arming, and only a
    /// window reset clears the armed marker.
    async fn try_admit(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<AdmitOutcome>;

    /// Returns the raw stored record without applying window-reset
    /// projection.
    async fn find(&self, account_id: &AccountId) -> AppResult<Option<RateLimitRecord>>;

    /// Deletes the record. Returns whether one existed.
    async fn delete(&self, account_id: &AccountId) -> AppResult<bool>;
}
