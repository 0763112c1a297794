use crate::clock::Clock;
use crate::config::{StorageType, TwoFactorConfig};
use crate::errors::VerificationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Rate window keys starting with this prefix belong to the origin dimension;
/// bare keys are subjects.
pub const ORIGIN_KEY_PREFIX: &str = "ip:";

/// Result of [`Store::register_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failure counted, threshold not reached.
    Counted(u32),
    /// Threshold reached: the block was set and the counter reset in the same step.
    Blocked(DateTime<Utc>),
}

/// Best-effort view of the abuse-control state, for monitoring only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub subject_rate_limits: BTreeMap<String, DateTime<Utc>>,
    pub origin_rate_limits: BTreeMap<String, DateTime<Utc>>,
    pub failed_attempts: BTreeMap<String, u32>,
    pub blocked: BTreeMap<String, DateTime<Utc>>,
}

impl StoreStats {
    pub(crate) fn record_rate_window(&mut self, key: &str, expires_at: DateTime<Utc>) {
        match key.strip_prefix(ORIGIN_KEY_PREFIX) {
            Some(origin) => {
                self.origin_rate_limits.insert(origin.to_string(), expires_at);
            }
            None => {
                self.subject_rate_limits.insert(key.to_string(), expires_at);
            }
        }
    }
}

/// Shared state for codes, rate windows and failure counters.
///
/// Every method may be called concurrently. Operations on the same subject
/// are linearizable; operations on different subjects are independent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Upserts the code for `subject`; unreachable after `ttl_seconds`.
    async fn save_code(
        &self,
        subject: &str,
        code: &str,
        ttl_seconds: u64,
    ) -> Result<(), VerificationError>;
    async fn get_code(&self, subject: &str) -> Result<Option<String>, VerificationError>;
    async fn delete_code(&self, subject: &str) -> Result<(), VerificationError>;
    /// Deletes the live code for `subject` if it equals `submitted`, in one
    /// step. Of any number of concurrent calls with the right code, exactly
    /// one returns `true`.
    async fn consume_code(&self, subject: &str, submitted: &str)
        -> Result<bool, VerificationError>;

    async fn save_rate_window(
        &self,
        key: &str,
        window_seconds: u64,
    ) -> Result<(), VerificationError>;
    async fn is_rate_limited(&self, key: &str) -> Result<bool, VerificationError>;

    /// Atomic increment; concurrent calls never lose an update.
    async fn increment_failures(&self, subject: &str) -> Result<u32, VerificationError>;
    /// Increments the failure counter and, once it reaches `max_attempts`,
    /// blocks the subject until `block_until` and resets the counter, atomically.
    async fn register_failure(
        &self,
        subject: &str,
        max_attempts: u32,
        block_until: DateTime<Utc>,
    ) -> Result<FailureOutcome, VerificationError>;
    /// Clears the counter and any block.
    async fn reset_failures(&self, subject: &str) -> Result<(), VerificationError>;
    /// `Some(until)` while a block is in the future. Expired blocks read as absent.
    async fn is_blocked(&self, subject: &str) -> Result<Option<DateTime<Utc>>, VerificationError>;
    async fn set_blocked(&self, subject: &str, until: DateTime<Utc>)
        -> Result<(), VerificationError>;

    /// Never mutates. May be stale under concurrent writes.
    async fn stats(&self) -> Result<StoreStats, VerificationError>;
}

pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(u32::MAX as u64) as i64)
}

/// Builds the backend selected by `config.storage_type`.
pub fn build_store(
    config: &TwoFactorConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Store>, VerificationError> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
        StorageType::Redis => {
            info!("Using Redis storage");
            Ok(Arc::new(RedisStore::new(
                &config.redis_url,
                clock,
                config.failed_attempts_ttl_seconds,
            )?))
        }
    }
}
