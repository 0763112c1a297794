use crate::config::TwoFactorConfig;
use crate::errors::VerificationError;
use crate::guard::mask_subject;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub const CODE_EMAIL_SUBJECT: &str = "Your verification code";

/// Delivers an issued code to its subject. Called once per issuance, never retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, address: &str, code: &str) -> Result<(), VerificationError>;
}

/// The message every notifier delivers, whatever the channel.
struct CodeEmail<'a> {
    to: &'a str,
    subject: &'static str,
    body: String,
}

impl<'a> CodeEmail<'a> {
    fn new(to: &'a str, code: &str) -> Self {
        Self {
            to,
            subject: CODE_EMAIL_SUBJECT,
            body: format!("Your verification code is: {}", code),
        }
    }
}

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

fn smtp_transport(config: &TwoFactorConfig) -> Result<Mailer, VerificationError> {
    let host = config.smtp_server.as_str();

    // Local catch-all servers (Mailpit, MailHog) listen on 1025 without TLS or auth.
    if config.smtp_port == 1025 {
        return Ok(Mailer::builder_dangerous(host)
            .port(config.smtp_port)
            .build());
    }

    let relay = if config.smtp_starttls {
        Mailer::starttls_relay(host)
    } else {
        Mailer::relay(host)
    };
    let mut builder = relay
        .map_err(|e| VerificationError::ConfigError(format!("Invalid SMTP host {}: {}", host, e)))?
        .port(config.smtp_port);
    if !config.smtp_username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        ));
    }
    Ok(builder.build())
}

/// SMTP delivery. The sender mailbox is validated once, at construction.
pub struct LettreNotifier {
    mailer: Mailer,
    from: Mailbox,
}

impl LettreNotifier {
    pub fn new(config: &TwoFactorConfig) -> Result<Self, VerificationError> {
        let address: Address = config
            .mail_from
            .parse()
            .map_err(|e| VerificationError::ConfigError(format!("Invalid FROM_EMAIL: {}", e)))?;
        Ok(Self {
            mailer: smtp_transport(config)?,
            from: Mailbox::new(Some(config.mail_from_name.clone()), address),
        })
    }

    fn compose(&self, email: CodeEmail<'_>) -> Result<Message, VerificationError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| VerificationError::DeliveryFailed(format!("Invalid recipient: {}", e)))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| VerificationError::DeliveryFailed(format!("Unbuildable message: {}", e)))
    }
}

#[async_trait]
impl Notifier for LettreNotifier {
    async fn send(&self, address: &str, code: &str) -> Result<(), VerificationError> {
        let message = self.compose(CodeEmail::new(address, code))?;
        self.mailer
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| VerificationError::DeliveryFailed(format!("SMTP delivery failed: {}", e)))
    }
}

/// Development notifier: writes the message to the log instead of sending it.
#[derive(Clone, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, address: &str, code: &str) -> Result<(), VerificationError> {
        let email = CodeEmail::new(address, code);
        info!(
            to = %mask_subject(email.to),
            subject = email.subject,
            "Console delivery: {}",
            email.body
        );
        Ok(())
    }
}
