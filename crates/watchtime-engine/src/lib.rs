//! Watch-time quota engine.
//!
//! This crate provides:
//! - `QuotaEngine`: daily limit, wallet and usage rules over an injected store
//! - `AdUnlockSequencer` and `SessionTimer` built on the engine
//! - Local (file-backed) and Firestore quota stores behind one trait
//! - `BackendSelector` for per-user backend choice and migration

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod store;
pub mod timer;
pub mod unlock;

mod transitions;

pub use backend::{BackendSelector, MigrationOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::QuotaEngine;
pub use error::{QuotaError, QuotaResult, StoreError, StoreResult};
pub use store::{FirestoreQuotaStore, LocalQuotaStore, QuotaStore, RecordMutation};
pub use timer::{SessionTimer, SessionToken};
pub use unlock::AdUnlockSequencer;
