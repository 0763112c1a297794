#![doc = include_str!("../README.md")]

#[cfg(feature = "axum")]
pub mod axum_api;
pub mod clock;
pub mod code;
pub mod config;
pub mod email;
pub mod errors;
pub mod guard;
pub mod lifecycle;
pub mod monitor;
pub mod service;
pub mod storage;

pub use clock::{Clock, MockClock, SystemClock};
pub use code::{CodeGenerator, RandomCodeGenerator};
pub use config::{StorageType, TwoFactorConfig};
pub use email::{ConsoleNotifier, LettreNotifier, Notifier};
pub use errors::VerificationError;
pub use guard::AbuseGuard;
pub use lifecycle::CodeLifecycle;
pub use monitor::StatsReporter;
pub use service::VerificationService;
pub use storage::{build_store, FailureOutcome, MemoryStore, RedisStore, Store, StoreStats};
