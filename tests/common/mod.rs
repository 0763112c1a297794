use async_trait::async_trait;
use axum_email_2fa::{
    CodeGenerator, MemoryStore, MockClock, Notifier, TwoFactorConfig, VerificationError,
    VerificationService,
};
use chrono::Duration;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Captures every delivered code; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub fn last_code_for(&self, address: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == address)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, address: &str, code: &str) -> Result<(), VerificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VerificationError::DeliveryFailed("mailbox offline".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), code.to_string()));
        Ok(())
    }
}

/// Hands out 100001, 100002, ... so successive codes never collide.
#[derive(Default)]
pub struct SequentialCodes {
    next: AtomicU32,
}

impl CodeGenerator for SequentialCodes {
    fn generate(&self) -> String {
        format!("{:06}", 100_001 + self.next.fetch_add(1, Ordering::SeqCst))
    }
}

pub struct TestApp {
    pub service: Arc<VerificationService>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<MockClock>,
    pub store: Arc<MemoryStore>,
}

#[allow(dead_code)]
impl TestApp {
    /// Moves past the one-minute rate window.
    pub fn next_window(&self) {
        self.clock.advance(Duration::seconds(61));
    }

    pub async fn issue(&self, origin: &str, subject: &str) -> String {
        self.service.request_code(origin, subject).await.unwrap();
        self.notifier.last_code_for(subject).unwrap()
    }

    /// Submits in a fresh window so only code validity and lockout decide.
    pub async fn submit(&self, subject: &str, code: &str) -> Result<(), VerificationError> {
        self.next_window();
        self.service.submit_code("198.51.100.1", subject, code).await
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(TwoFactorConfig::default())
}

pub fn spawn_app_with(config: TwoFactorConfig) -> TestApp {
    let clock = Arc::new(MockClock::default());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let notifier = Arc::new(RecordingNotifier::default());
    let service = Arc::new(VerificationService::with_generator(
        config,
        store.clone(),
        notifier.clone(),
        clock.clone(),
        Arc::new(SequentialCodes::default()),
    ));

    TestApp {
        service,
        notifier,
        clock,
        store,
    }
}
