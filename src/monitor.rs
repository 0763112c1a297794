use crate::service::VerificationService;
use crate::storage::StoreStats;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{info, instrument};

/// Periodically logs a summary of the abuse-control state.
pub struct StatsReporter {
    service: Arc<VerificationService>,
}

/// Counts only; individual subjects stay out of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSummary {
    pub subject_rate_limits: usize,
    pub origin_rate_limits: usize,
    pub subjects_with_failures: usize,
    pub blocked_subjects: usize,
}

impl From<&StoreStats> for StatsSummary {
    fn from(stats: &StoreStats) -> Self {
        Self {
            subject_rate_limits: stats.subject_rate_limits.len(),
            origin_rate_limits: stats.origin_rate_limits.len(),
            subjects_with_failures: stats.failed_attempts.len(),
            blocked_subjects: stats.blocked.len(),
        }
    }
}

impl StatsReporter {
    pub fn new(service: Arc<VerificationService>) -> Self {
        Self { service }
    }

    #[instrument(skip(self))]
    pub async fn report(&self) -> StatsSummary {
        let summary = StatsSummary::from(&self.service.stats().await);
        info!(
            subject_rate_limits = summary.subject_rate_limits,
            origin_rate_limits = summary.origin_rate_limits,
            subjects_with_failures = summary.subjects_with_failures,
            blocked_subjects = summary.blocked_subjects,
            "Abuse-control snapshot"
        );
        summary
    }

    /// Runs forever; spawn it on the runtime.
    pub async fn start_scheduler(self: Arc<Self>, interval: Duration) {
        let mut timer = time::interval(interval);

        info!("Stats reporter started with interval: {:?}", interval);

        loop {
            timer.tick().await;
            self.report().await;
        }
    }
}
