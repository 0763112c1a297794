use crate::clock::Clock;
use crate::code::{CodeGenerator, RandomCodeGenerator};
use crate::config::TwoFactorConfig;
use crate::email::Notifier;
use crate::errors::VerificationError;
use crate::guard::{mask_subject, AbuseGuard};
use crate::lifecycle::CodeLifecycle;
use crate::storage::{Store, StoreStats};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Entry point for the transport layer.
pub struct VerificationService {
    pub config: TwoFactorConfig,
    storage: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    guard: AbuseGuard,
    lifecycle: CodeLifecycle,
}

impl VerificationService {
    pub fn new(
        config: TwoFactorConfig,
        storage: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let generator = Arc::new(RandomCodeGenerator::new(config.code_length));
        Self::with_generator(config, storage, notifier, clock, generator)
    }

    pub fn with_generator(
        config: TwoFactorConfig,
        storage: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        let guard = AbuseGuard::new(storage.clone(), clock, config.clone());
        let lifecycle = CodeLifecycle::new(storage.clone(), generator, config.code_ttl_seconds);
        Self {
            config,
            storage,
            notifier,
            guard,
            lifecycle,
        }
    }

    /// Issues a code and hands it to the notifier.
    ///
    /// A delivery failure is reported but the code stays valid until it
    /// expires or is superseded by the next request.
    #[instrument(skip(self, subject), fields(subject = %mask_subject(subject)))]
    pub async fn request_code(&self, origin: &str, subject: &str) -> Result<(), VerificationError> {
        self.guard.check_issue(origin, subject).await?;

        let code = self.lifecycle.issue(subject).await?;

        if let Err(e) = self.notifier.send(subject, &code).await {
            error!("Failed to deliver code: {}", e);
            return Err(e);
        }

        info!("Verification code issued");
        Ok(())
    }

    /// `Ok(())` means verified. Wrong, expired and never-issued codes all
    /// yield `InvalidOrExpired`.
    #[instrument(skip(self, subject, code), fields(subject = %mask_subject(subject)))]
    pub async fn submit_code(
        &self,
        origin: &str,
        subject: &str,
        code: &str,
    ) -> Result<(), VerificationError> {
        self.guard.check_verify(origin, subject).await?;

        if self.lifecycle.validate(subject, code).await? {
            self.guard.record_success(subject).await?;
            info!("Verification code accepted");
            Ok(())
        } else {
            self.guard.record_failure(subject).await?;
            Err(VerificationError::InvalidOrExpired)
        }
    }

    /// Monitoring snapshot. A backend failure yields an empty snapshot.
    pub async fn stats(&self) -> StoreStats {
        match self.storage.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Stats unavailable: {}", e);
                StoreStats::default()
            }
        }
    }

    /// Administrative unlock: clears the failure counter and any active block.
    #[instrument(skip(self, subject), fields(subject = %mask_subject(subject)))]
    pub async fn reset_subject(&self, subject: &str) -> Result<(), VerificationError> {
        self.guard.record_success(subject).await?;
        info!("Failure state reset");
        Ok(())
    }
}
