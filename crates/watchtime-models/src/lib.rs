//! Shared data models for the watch-time quota engine.
//!
//! This crate provides Serde-serializable types for:
//! - The per-user quota record and its display snapshot
//! - Quota policy constants and their environment overrides
//! - Business-rule rejections
//! - Operation outcomes (wallet application, limit reduction, unlock progress)

pub mod outcome;
pub mod policy;
pub mod record;
pub mod rejection;
pub mod snapshot;

// Re-export common types
pub use outcome::{BonusReset, LimitReduction, UnlockOutcome, UnlockState, WalletApplication};
pub use policy::{env_bool, ConfigError, QuotaPolicy, MILLIS_PER_MINUTE};
pub use record::QuotaRecord;
pub use rejection::Rejection;
pub use snapshot::{format_hours_minutes, QuotaSnapshot};
