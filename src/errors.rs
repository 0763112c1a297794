use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Too many failed attempts, retry in {retry_after_secs}s")]
    Blocked { retry_after_secs: u64 },

    /// Wrong, expired, already used or never issued. Callers cannot tell which.
    #[error("Invalid or expired code")]
    InvalidOrExpired,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl VerificationError {
    /// True for the backend-unavailable category (store unreachable or broken).
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            VerificationError::Redis(_) | VerificationError::StorageError(_)
        )
    }
}
