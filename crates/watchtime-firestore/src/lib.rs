//! Firestore backend for watch-time quota records.
//!
//! [`QuotaDocumentRepository`] keeps one document per user and updates it with
//! an `updateTime` precondition. Below it sits a small REST client that
//! authenticates with a service account, or talks to the emulator when
//! `FIRESTORE_EMULATOR_HOST` is set.

pub mod client;
pub mod error;
pub mod metrics;
pub mod quota_repo;
pub mod retry;
pub mod token_cache;
pub mod types;


pub use client::{DocumentPath, FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use quota_repo::QuotaDocumentRepository;
pub use retry::RetryConfig;
pub use types::{Document, FieldCodec, Fields, FieldsBuilder, Value};
