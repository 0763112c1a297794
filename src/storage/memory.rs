//! Single-process store.
//!
//! Expiry is evaluated lazily on read: expired codes, windows and blocks are
//! reported as absent but stay in the maps until their key is written again.
//! Memory therefore grows with the number of distinct subjects and origins
//! seen over the process lifetime. Use [`RedisStore`](super::RedisStore) when
//! that matters.

use crate::clock::Clock;
use crate::errors::VerificationError;
use crate::storage::{seconds, FailureOutcome, Store, StoreStats};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
struct CodeEntry {
    value: String,
    issued_at: DateTime<Utc>,
    ttl: Duration,
}

impl CodeEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.issued_at + self.ttl > now
    }
}

#[derive(Default)]
struct Tables {
    codes: HashMap<String, CodeEntry>,
    rate_windows: HashMap<String, DateTime<Utc>>,
    failures: HashMap<String, u32>,
    blocked_until: HashMap<String, DateTime<Utc>>,
}

impl Tables {
    fn bump_failures(&mut self, subject: &str) -> u32 {
        let count = self.failures.entry(subject.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// All maps sit behind one mutex. Every operation is O(1) except `stats`.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, VerificationError> {
        self.tables
            .lock()
            .map_err(|_| VerificationError::StorageError("Lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_code(
        &self,
        subject: &str,
        code: &str,
        ttl_seconds: u64,
    ) -> Result<(), VerificationError> {
        let entry = CodeEntry {
            value: code.to_string(),
            issued_at: self.clock.now(),
            ttl: seconds(ttl_seconds),
        };
        self.tables()?.codes.insert(subject.to_string(), entry);
        Ok(())
    }

    async fn get_code(&self, subject: &str) -> Result<Option<String>, VerificationError> {
        let now = self.clock.now();
        let tables = self.tables()?;
        Ok(tables
            .codes
            .get(subject)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete_code(&self, subject: &str) -> Result<(), VerificationError> {
        self.tables()?.codes.remove(subject);
        Ok(())
    }

    async fn consume_code(
        &self,
        subject: &str,
        submitted: &str,
    ) -> Result<bool, VerificationError> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        let matches = matches!(
            tables.codes.get(subject),
            Some(entry) if entry.is_live(now) && entry.value == submitted
        );
        if matches {
            tables.codes.remove(subject);
        }
        Ok(matches)
    }

    async fn save_rate_window(
        &self,
        key: &str,
        window_seconds: u64,
    ) -> Result<(), VerificationError> {
        let expires_at = self.clock.now() + seconds(window_seconds);
        self.tables()?
            .rate_windows
            .insert(key.to_string(), expires_at);
        Ok(())
    }

    async fn is_rate_limited(&self, key: &str) -> Result<bool, VerificationError> {
        let now = self.clock.now();
        let tables = self.tables()?;
        Ok(matches!(tables.rate_windows.get(key), Some(until) if *until > now))
    }

    async fn increment_failures(&self, subject: &str) -> Result<u32, VerificationError> {
        Ok(self.tables()?.bump_failures(subject))
    }

    async fn register_failure(
        &self,
        subject: &str,
        max_attempts: u32,
        block_until: DateTime<Utc>,
    ) -> Result<FailureOutcome, VerificationError> {
        let mut tables = self.tables()?;
        let count = tables.bump_failures(subject);
        if count >= max_attempts {
            tables.failures.remove(subject);
            tables
                .blocked_until
                .insert(subject.to_string(), block_until);
            return Ok(FailureOutcome::Blocked(block_until));
        }
        Ok(FailureOutcome::Counted(count))
    }

    async fn reset_failures(&self, subject: &str) -> Result<(), VerificationError> {
        let mut tables = self.tables()?;
        tables.failures.remove(subject);
        tables.blocked_until.remove(subject);
        Ok(())
    }

    async fn is_blocked(&self, subject: &str) -> Result<Option<DateTime<Utc>>, VerificationError> {
        let now = self.clock.now();
        let tables = self.tables()?;
        Ok(tables
            .blocked_until
            .get(subject)
            .copied()
            .filter(|until| *until > now))
    }

    async fn set_blocked(
        &self,
        subject: &str,
        until: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        self.tables()?
            .blocked_until
            .insert(subject.to_string(), until);
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, VerificationError> {
        let now = self.clock.now();
        let tables = self.tables()?;
        let mut stats = StoreStats::default();

        for (key, until) in tables.rate_windows.iter().filter(|(_, u)| **u > now) {
            stats.record_rate_window(key, *until);
        }
        stats.failed_attempts = tables
            .failures
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(subject, count)| (subject.clone(), *count))
            .collect();
        stats.blocked = tables
            .blocked_until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(subject, until)| (subject.clone(), *until))
            .collect();

        Ok(stats)
    }
}
