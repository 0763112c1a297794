//! Redis-backed store for multi-instance deployments.
//!
//! Key layout: `code:<subject>`, `rate:<key>`, `failed:<subject>`,
//! `blocked:<subject>`. Every write carries a TTL, so nothing needs a local
//! cleanup pass.

use crate::clock::Clock;
use crate::errors::VerificationError;
use crate::storage::{seconds, FailureOutcome, Store, StoreStats};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use tracing::debug;

const CODE_PREFIX: &str = "code:";
const RATE_PREFIX: &str = "rate:";
const FAILED_PREFIX: &str = "failed:";
const BLOCKED_PREFIX: &str = "blocked:";

const REGISTER_FAILURE_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[3]))

if count >= tonumber(ARGV[1]) then
  redis.call('SET', KEYS[2], ARGV[2], 'EX', tonumber(ARGV[4]))
  redis.call('DEL', KEYS[1])
  return {count, 1}
end

return {count, 0}
"#;

const CONSUME_CODE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end

return 0
"#;

pub struct RedisStore {
    client: redis::Client,
    clock: Arc<dyn Clock>,
    failed_attempts_ttl_seconds: u64,
}

impl RedisStore {
    pub fn new(
        redis_url: &str,
        clock: Arc<dyn Clock>,
        failed_attempts_ttl_seconds: u64,
    ) -> Result<Self, VerificationError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            clock,
            failed_attempts_ttl_seconds: failed_attempts_ttl_seconds.max(1),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, VerificationError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Whole seconds until `until`, rounded up so the key never dies early.
    fn ttl_until(&self, until: DateTime<Utc>) -> Option<u64> {
        let remaining = until - self.clock.now();
        if remaining <= Duration::zero() {
            return None;
        }
        let secs = remaining.num_seconds() as u64;
        if remaining > Duration::seconds(secs as i64) {
            Some(secs + 1)
        } else {
            Some(secs)
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, VerificationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VerificationError::StorageError(format!("Corrupt block timestamp: {}", e)))
}

/// SCAN instead of KEYS so large keyspaces don't stall the server.
async fn scan_keys(
    conn: &mut MultiplexedConnection,
    pattern: &str,
) -> Result<Vec<String>, VerificationError> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(&mut *conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            return Ok(keys);
        }
        cursor = next;
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn save_code(
        &self,
        subject: &str,
        code: &str,
        ttl_seconds: u64,
    ) -> Result<(), VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", CODE_PREFIX, subject);
        conn.set_ex::<_, _, ()>(key, code, ttl_seconds.max(1)).await?;
        Ok(())
    }

    async fn get_code(&self, subject: &str) -> Result<Option<String>, VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", CODE_PREFIX, subject);
        let code: Option<String> = conn.get(key).await?;
        Ok(code)
    }

    async fn delete_code(&self, subject: &str) -> Result<(), VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", CODE_PREFIX, subject);
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn consume_code(
        &self,
        subject: &str,
        submitted: &str,
    ) -> Result<bool, VerificationError> {
        let mut conn = self.connection().await?;
        let script = Script::new(CONSUME_CODE_SCRIPT);
        let consumed: i64 = script
            .key(format!("{}{}", CODE_PREFIX, subject))
            .arg(submitted)
            .invoke_async(&mut conn)
            .await?;
        Ok(consumed == 1)
    }

    async fn save_rate_window(
        &self,
        key: &str,
        window_seconds: u64,
    ) -> Result<(), VerificationError> {
        let mut conn = self.connection().await?;
        let window_seconds = window_seconds.max(1);
        let expires_at = self.clock.now() + seconds(window_seconds);
        let key = format!("{}{}", RATE_PREFIX, key);
        conn.set_ex::<_, _, ()>(key, expires_at.to_rfc3339(), window_seconds)
            .await?;
        Ok(())
    }

    async fn is_rate_limited(&self, key: &str) -> Result<bool, VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", RATE_PREFIX, key);
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn increment_failures(&self, subject: &str) -> Result<u32, VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", FAILED_PREFIX, subject);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, self.failed_attempts_ttl_seconds as i64)
            .await?;
        Ok(count)
    }

    async fn register_failure(
        &self,
        subject: &str,
        max_attempts: u32,
        block_until: DateTime<Utc>,
    ) -> Result<FailureOutcome, VerificationError> {
        let mut conn = self.connection().await?;
        let block_seconds = self.ttl_until(block_until).unwrap_or(1);

        let script = Script::new(REGISTER_FAILURE_SCRIPT);
        let (count, blocked): (u32, i64) = script
            .key(format!("{}{}", FAILED_PREFIX, subject))
            .key(format!("{}{}", BLOCKED_PREFIX, subject))
            .arg(max_attempts)
            .arg(block_until.to_rfc3339())
            .arg(self.failed_attempts_ttl_seconds)
            .arg(block_seconds)
            .invoke_async(&mut conn)
            .await?;

        if blocked == 1 {
            Ok(FailureOutcome::Blocked(block_until))
        } else {
            Ok(FailureOutcome::Counted(count))
        }
    }

    async fn reset_failures(&self, subject: &str) -> Result<(), VerificationError> {
        let mut conn = self.connection().await?;
        let keys = vec![
            format!("{}{}", FAILED_PREFIX, subject),
            format!("{}{}", BLOCKED_PREFIX, subject),
        ];
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn is_blocked(&self, subject: &str) -> Result<Option<DateTime<Utc>>, VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", BLOCKED_PREFIX, subject);
        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let until = parse_timestamp(&raw)?;
        if until > self.clock.now() {
            return Ok(Some(until));
        }

        // TTL rounding can leave the key alive for up to a second past `until`.
        conn.del::<_, ()>(&key).await?;
        Ok(None)
    }

    async fn set_blocked(
        &self,
        subject: &str,
        until: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", BLOCKED_PREFIX, subject);
        match self.ttl_until(until) {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, until.to_rfc3339(), ttl).await?,
            None => conn.del::<_, ()>(key).await?,
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, VerificationError> {
        let mut conn = self.connection().await?;
        let now = self.clock.now();
        let mut stats = StoreStats::default();

        // Keys may expire between SCAN and the follow-up read; those are skipped.
        for key in scan_keys(&mut conn, &format!("{}*", RATE_PREFIX)).await? {
            let ttl_ms: i64 = match conn.pttl(&key).await {
                Ok(ttl) => ttl,
                Err(e) => {
                    debug!("Skipping rate key {}: {}", key, e);
                    continue;
                }
            };
            if ttl_ms > 0 {
                stats.record_rate_window(
                    &key[RATE_PREFIX.len()..],
                    now + Duration::milliseconds(ttl_ms),
                );
            }
        }

        for key in scan_keys(&mut conn, &format!("{}*", FAILED_PREFIX)).await? {
            if let Ok(Some(count)) = conn.get::<_, Option<u32>>(&key).await {
                if count > 0 {
                    stats
                        .failed_attempts
                        .insert(key[FAILED_PREFIX.len()..].to_string(), count);
                }
            }
        }

        for key in scan_keys(&mut conn, &format!("{}*", BLOCKED_PREFIX)).await? {
            let raw = match conn.get::<_, Option<String>>(&key).await {
                Ok(Some(raw)) => raw,
                _ => continue,
            };
            if let Ok(until) = parse_timestamp(&raw) {
                if until > now {
                    stats
                        .blocked
                        .insert(key[BLOCKED_PREFIX.len()..].to_string(), until);
                }
            }
        }

        Ok(stats)
    }
}
