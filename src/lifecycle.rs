use crate::code::CodeGenerator;
use crate::errors::VerificationError;
use crate::storage::Store;
use std::sync::Arc;

/// Issues codes and consumes them on successful validation.
pub struct CodeLifecycle {
    storage: Arc<dyn Store>,
    generator: Arc<dyn CodeGenerator>,
    ttl_seconds: u64,
}

impl CodeLifecycle {
    pub fn new(
        storage: Arc<dyn Store>,
        generator: Arc<dyn CodeGenerator>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            storage,
            generator,
            ttl_seconds,
        }
    }

    /// Stores a fresh code for `subject`, replacing any earlier one, and
    /// returns it for delivery.
    pub async fn issue(&self, subject: &str) -> Result<String, VerificationError> {
        let code = self.generator.generate();
        self.storage
            .save_code(subject, &code, self.ttl_seconds)
            .await?;
        Ok(code)
    }

    /// `true` only when `submitted` matches the live code; the code is then
    /// consumed, so concurrent submissions of the same code succeed at most once.
    pub async fn validate(&self, subject: &str, submitted: &str) -> Result<bool, VerificationError> {
        self.storage.consume_code(subject, submitted).await
    }
}
