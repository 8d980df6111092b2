//! Redis-backed per-account admission store.
//!
//! The whole admission branch runs inside one Lua script, so the
//! reset/block/increment sequence is atomic on the Redis side exactly like
//! the guarded statements of the Postgres store.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::{AsyncCommands, Script};

use replygate_application::{AdmitOutcome, RateLimitPolicy, RateLimitRecord, RateLimitStore};
use replygate_core::{AccountId, AppError, AppResult, OwnerId};

const TRY_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local block_ms = tonumber(ARGV[3])
local threshold = tonumber(ARGV[4])
local hard_limit = tonumber(ARGV[5])
local owner_id = ARGV[6]

local calls = tonumber(redis.call('HGET', key, 'calls') or '0')
local window_started = tonumber(redis.call('HGET', key, 'window_started_ms') or '0')
local blocked_until = tonumber(redis.call('HGET', key, 'blocked_until_ms') or '0')
local is_blocked = tonumber(redis.call('HGET', key, 'is_blocked') or '0')

if window_started == 0 or now_ms - window_started >= window_ms then
  calls = 0
  window_started = now_ms
  blocked_until = 0
  is_blocked = 0
end

-- The soft block arms once per window; after it expires the account climbs
-- toward the hard ceiling without re-arming.
local admitted = 0
if blocked_until > now_ms then
  admitted = 0
elseif is_blocked == 0 and calls >= threshold then
  is_blocked = 1
  blocked_until = now_ms + block_ms
  admitted = 0
elseif calls >= hard_limit then
  admitted = 0
else
  calls = calls + 1
  admitted = 1
  if is_blocked == 0 and calls >= threshold then
    is_blocked = 1
    blocked_until = now_ms + block_ms
  end
end

redis.call('HSET', key,
  'calls', calls,
  'window_started_ms', window_started,
  'blocked_until_ms', blocked_until,
  'is_blocked', is_blocked,
  'owner_id', owner_id)
redis.call('PEXPIRE', key, window_ms * 2)

return {admitted, calls, window_started, blocked_until, is_blocked}
"#;

/// Redis implementation of the rate limit store port.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisRateLimitStore {
    /// Creates a store with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, account_id: &AccountId) -> String {
        format!("{}:{}", self.key_prefix, account_id)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn try_admit(
        &self,
        account_id: &AccountId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> AppResult<AdmitOutcome> {
        let mut connection = self.connection().await?;

        let script = Script::new(TRY_ADMIT_SCRIPT);
        let (admitted, calls, window_started_ms, blocked_until_ms, is_blocked): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = script
            .key(self.key_for(account_id))
            .arg(now.timestamp_millis())
            .arg(policy.window_seconds * 1000)
            .arg(policy.block_seconds * 1000)
            .arg(policy.block_threshold)
            .arg(policy.hard_limit)
            .arg(owner_id.as_str())
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to run redis admission script for account '{account_id}': {error}"
                ))
            })?;

        let record = RateLimitRecord {
            account_id: account_id.clone(),
            owner_id: owner_id.clone(),
            calls: i32::try_from(calls).map_err(|error| {
                AppError::Internal(format!("invalid redis call counter: {error}"))
            })?,
            window_started_at: millis_to_datetime(window_started_ms)?,
            is_blocked: is_blocked == 1,
            blocked_until: if blocked_until_ms > 0 {
                Some(millis_to_datetime(blocked_until_ms)?)
            } else {
                None
            },
        };

        if admitted == 1 {
            Ok(AdmitOutcome::Admitted(record))
        } else {
            Ok(AdmitOutcome::Denied(record))
        }
    }

    async fn find(&self, account_id: &AccountId) -> AppResult<Option<RateLimitRecord>> {
        let mut connection = self.connection().await?;
        let fields: Vec<(String, String)> = connection
            .hgetall(self.key_for(account_id))
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to load redis rate limit record for account '{account_id}': {error}"
                ))
            })?;

        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let parse_i64 = |name: &str| -> AppResult<i64> {
            field(name)
                .unwrap_or("0")
                .parse::<i64>()
                .map_err(|error| {
                    AppError::Internal(format!("invalid redis field '{name}': {error}"))
                })
        };

        let calls = i32::try_from(parse_i64("calls")?)
            .map_err(|error| AppError::Internal(format!("invalid redis call counter: {error}")))?;
        let window_started_ms = parse_i64("window_started_ms")?;
        let blocked_until_ms = parse_i64("blocked_until_ms")?;
        let is_blocked = parse_i64("is_blocked")? == 1;
        let owner_id = OwnerId::new(field("owner_id").unwrap_or_default())?;

        Ok(Some(RateLimitRecord {
            account_id: account_id.clone(),
            owner_id,
            calls,
            window_started_at: millis_to_datetime(window_started_ms)?,
            is_blocked,
            blocked_until: if blocked_until_ms > 0 {
                Some(millis_to_datetime(blocked_until_ms)?)
            } else {
                None
            },
        }))
    }

    async fn delete(&self, account_id: &AccountId) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let deleted: i64 = connection
            .del(self.key_for(account_id))
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete redis rate limit record for account '{account_id}': {error}"
                ))
            })?;

        Ok(deleted > 0)
    }
}

fn millis_to_datetime(millis: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AppError::Internal(format!("invalid redis timestamp {millis}")))
}
