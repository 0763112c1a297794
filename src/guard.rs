use crate::clock::Clock;
use crate::config::TwoFactorConfig;
use crate::errors::VerificationError;
use crate::storage::{seconds, FailureOutcome, Store, ORIGIN_KEY_PREFIX};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rate limiting per origin and per subject, plus brute-force lockout.
///
/// Each rate check commits its window as soon as it passes, before the next
/// check runs. A request rejected by the subject check has still spent its
/// origin budget, and nothing is rolled back on a later failure.
pub struct AbuseGuard {
    storage: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: TwoFactorConfig,
}

impl AbuseGuard {
    pub fn new(storage: Arc<dyn Store>, clock: Arc<dyn Clock>, config: TwoFactorConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    pub fn origin_key(origin: &str) -> String {
        format!("{}{}", ORIGIN_KEY_PREFIX, origin)
    }

    async fn check_window(&self, key: &str) -> Result<(), VerificationError> {
        if self.storage.is_rate_limited(key).await? {
            return Err(VerificationError::RateLimited);
        }
        self.storage
            .save_rate_window(key, self.config.rate_limit_window_seconds)
            .await
    }

    /// Origin window, then subject window.
    pub async fn check_issue(&self, origin: &str, subject: &str) -> Result<(), VerificationError> {
        if let Err(e) = self.check_window(&Self::origin_key(origin)).await {
            debug!("Origin {} rejected: {}", origin, e);
            return Err(e);
        }
        if let Err(e) = self.check_window(subject).await {
            debug!("Subject {} rejected: {}", mask_subject(subject), e);
            return Err(e);
        }
        Ok(())
    }

    /// Both rate windows, then the lockout gate.
    pub async fn check_verify(&self, origin: &str, subject: &str) -> Result<(), VerificationError> {
        self.check_issue(origin, subject).await?;
        if let Some(until) = self.storage.is_blocked(subject).await? {
            return Err(VerificationError::Blocked {
                retry_after_secs: retry_after(until, self.clock.now()),
            });
        }
        Ok(())
    }

    pub async fn record_failure(&self, subject: &str) -> Result<FailureOutcome, VerificationError> {
        let block_until = self.clock.now() + seconds(self.config.block_duration_seconds);
        let outcome = self
            .storage
            .register_failure(subject, self.config.max_failed_attempts, block_until)
            .await?;
        match outcome {
            FailureOutcome::Blocked(until) => {
                warn!("Subject {} locked out until {}", mask_subject(subject), until)
            }
            FailureOutcome::Counted(count) => {
                debug!("Subject {} failed attempt {}", mask_subject(subject), count)
            }
        }
        Ok(outcome)
    }

    pub async fn record_success(&self, subject: &str) -> Result<(), VerificationError> {
        self.storage.reset_failures(subject).await
    }
}

/// Whole seconds until `until`, at least 1.
fn retry_after(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (until - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000).max(1)
}

/// `alice@example.com` -> `a***@example.com`, for log lines.
pub(crate) fn mask_subject(subject: &str) -> String {
    let (local, domain) = match subject.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (subject, None),
    };
    let first: String = local.chars().take(1).collect();
    match domain {
        Some(domain) => format!("{}***@{}", first, domain),
        None => format!("{}***", first),
    }
}
