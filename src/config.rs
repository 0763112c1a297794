use crate::errors::VerificationError;

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub code_ttl_seconds: u64,
    pub code_length: usize,
    pub rate_limit_window_seconds: u64,
    pub max_failed_attempts: u32,
    pub block_duration_seconds: u64,
    pub failed_attempts_ttl_seconds: u64,
    pub storage_type: StorageType,
    pub redis_url: String,
    /// Take the client origin from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_starttls: bool,
    pub smtp_username: String,
    pub smtp_password: String,
    pub mail_from: String,
    pub mail_from_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageType {
    Memory,
    Redis,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            code_ttl_seconds: 600,
            code_length: 6,
            rate_limit_window_seconds: 60,
            max_failed_attempts: 5,
            block_duration_seconds: 600,
            failed_attempts_ttl_seconds: 24 * 60 * 60,
            storage_type: StorageType::Memory,
            redis_url: "redis://localhost:6379/".to_string(),
            trust_forwarded_for: false,
            smtp_server: "localhost".to_string(),
            smtp_port: 1025,
            smtp_starttls: true,
            smtp_username: "".to_string(),
            smtp_password: "".to_string(),
            mail_from: "noreply@example.com".to_string(),
            mail_from_name: "Verification".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, VerificationError> {
    match std::env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| VerificationError::ConfigError(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}

/// A full `REDIS_URL` wins; otherwise the URL is assembled from the address
/// and optional password.
fn redis_url_from(url: Option<String>, addr: Option<String>, password: Option<String>) -> String {
    if let Some(url) = url {
        return url;
    }
    let addr = addr.unwrap_or_else(|| "localhost:6379".to_string());
    match password {
        Some(password) if !password.is_empty() => format!("redis://:{}@{}/", password, addr),
        _ => format!("redis://{}/", addr),
    }
}

impl TwoFactorConfig {
    pub fn from_env() -> Result<Self, VerificationError> {
        let mut config = Self::default();

        if let Some(val) = parse_var("CODE_TTL_SECONDS")? {
            config.code_ttl_seconds = val;
        }
        if let Some(val) = parse_var("CODE_LENGTH")? {
            config.code_length = val;
        }
        if let Some(val) = parse_var("RATE_LIMIT_WINDOW_SECONDS")? {
            config.rate_limit_window_seconds = val;
        }
        if let Some(val) = parse_var("MAX_FAILED_ATTEMPTS")? {
            config.max_failed_attempts = val;
        }
        if let Some(val) = parse_var("BLOCK_DURATION_SECONDS")? {
            config.block_duration_seconds = val;
        }
        if let Some(val) = parse_var("FAILED_ATTEMPTS_TTL_SECONDS")? {
            config.failed_attempts_ttl_seconds = val;
        }
        if config.max_failed_attempts == 0 {
            return Err(VerificationError::ConfigError(
                "MAX_FAILED_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if let Ok(val) = std::env::var("STORAGE_TYPE") {
            config.storage_type = match val.to_lowercase().as_str() {
                "" | "memory" => StorageType::Memory,
                "redis" => StorageType::Redis,
                _ => {
                    return Err(VerificationError::ConfigError(
                        "Invalid STORAGE_TYPE: must be 'memory' or 'redis'".to_string(),
                    ))
                }
            };
        }

        config.redis_url = redis_url_from(
            std::env::var("REDIS_URL").ok(),
            std::env::var("REDIS_ADDR").ok(),
            std::env::var("REDIS_PASSWORD").ok(),
        );

        if let Some(val) = parse_var("TRUST_FORWARDED_FOR")? {
            config.trust_forwarded_for = val;
        }

        if let Ok(val) = std::env::var("SMTP_HOST") {
            config.smtp_server = val;
        }
        if let Some(val) = parse_var("SMTP_PORT")? {
            config.smtp_port = val;
        }
        if let Ok(val) = std::env::var("SMTP_STARTTLS") {
            config.smtp_starttls = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("SMTP_USER") {
            config.smtp_username = val;
        }
        if let Ok(val) = std::env::var("SMTP_PASSWORD") {
            config.smtp_password = val;
        }
        if let Ok(val) = std::env::var("FROM_EMAIL") {
            config.mail_from = val;
        }
        if let Ok(val) = std::env::var("FROM_NAME") {
            config.mail_from_name = val;
        }

        Ok(config)
    }
}
