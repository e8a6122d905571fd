//! Redis-backed record store.
//!
//! Each record is a hash `{count, reset_at}` under `<prefix><key>`, with
//! `reset_at` in epoch milliseconds. A hit is one Lua script evaluated by
//! the server, so the read-modify-write is atomic across every process
//! sharing the instance. Keys carry a `PEXPIREAT` at their `reset_at`, so
//! Redis deletes expired records itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::record::{Hit, HitOutcome, LimitPolicy, RateLimitRecord};
use super::store::RateLimitStore;
use crate::error::StoreError;

/// KEYS[1] = record key; ARGV = now_ms, window_ms, max_requests.
/// Replies `{outcome_code, count, reset_at_ms}`.
const HIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local fields = redis.call('HMGET', KEYS[1], 'count', 'reset_at')
local count = tonumber(fields[1])
local reset_at = tonumber(fields[2])

if count == nil or reset_at == nil or reset_at <= now then
  local outcome = 1
  if count == nil or reset_at == nil then
    outcome = 0
  end
  reset_at = now + window
  redis.call('HSET', KEYS[1], 'count', 1, 'reset_at', reset_at)
  redis.call('PEXPIREAT', KEYS[1], reset_at)
  return {outcome, 1, reset_at}
end

if count < max then
  count = redis.call('HINCRBY', KEYS[1], 'count', 1)
  return {2, count, reset_at}
end

return {3, count, reset_at}
"#;

/// Records kept in Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `url`. The connection manager reconnects on its own.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(url = %url, key_prefix = %key_prefix, "Connected to Redis");
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            script: Script::new(HIT_SCRIPT),
        })
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn hit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        policy: &LimitPolicy,
    ) -> Result<Hit, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(self.record_key(key))
            .arg(now.timestamp_millis())
            .arg(policy.window.num_milliseconds())
            .arg(policy.max_requests)
            .invoke_async(&mut conn)
            .await?;

        let hit = decode_hit(key, &reply)?;
        if hit.outcome == HitOutcome::Created {
            debug!(key = %key, reset_at = %hit.record.reset_at, "Creating rate limit record");
        }
        Ok(hit)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let (count, reset_at): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
            .arg(self.record_key(key))
            .arg("count")
            .arg("reset_at")
            .query_async(&mut conn)
            .await?;

        decode_record(key, count, reset_at)
    }

    async fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        // Expiry is delegated to PEXPIREAT.
        Ok(0)
    }
}

fn decode_hit(key: &str, reply: &[i64]) -> Result<Hit, StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let [code, count, reset_at] = reply else {
        return Err(corrupt("hit script returned an unexpected reply"));
    };
    let outcome = HitOutcome::from_code(*code).ok_or_else(|| corrupt("unknown outcome code"))?;
    let count = u64::try_from(*count).map_err(|_| corrupt("negative count"))?;
    let reset_at = DateTime::from_timestamp_millis(*reset_at)
        .ok_or_else(|| corrupt("reset_at out of range"))?;

    Ok(Hit {
        record: RateLimitRecord {
            key: key.to_string(),
            count,
            reset_at,
        },
        outcome,
    })
}

fn decode_record(
    key: &str,
    count: Option<u64>,
    reset_at: Option<i64>,
) -> Result<Option<RateLimitRecord>, StoreError> {
    match (count, reset_at) {
        (None, None) => Ok(None),
        (Some(count), Some(reset_at)) => {
            let reset_at =
                DateTime::from_timestamp_millis(reset_at).ok_or_else(|| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "reset_at out of range".to_string(),
                })?;
            Ok(Some(RateLimitRecord {
                key: key.to_string(),
                count,
                reset_at,
            }))
        }
        _ => Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: "record is missing a field".to_string(),
        }),
    }
}
