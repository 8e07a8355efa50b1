//! Engine error types.

use thiserror::Error;
use watchtime_firestore::FirestoreError;
use watchtime_models::Rejection;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for engine operations.
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Infrastructure failures from a quota store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Update for {user_id} conflicted {attempts} times, giving up")]
    Conflict { user_id: String, attempts: u32 },

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Map a Firestore failure for one user, surfacing lock exhaustion as a conflict.
    pub fn from_firestore(user_id: &str, err: FirestoreError) -> Self {
        match err {
            FirestoreError::TransactionAborted(attempts) => Self::Conflict {
                user_id: user_id.to_string(),
                attempts,
            },
            other => Self::Firestore(other),
        }
    }
}

/// Errors returned by quota engine operations.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Expected business-rule refusal. The record was not changed.
    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A mutation would have broken a record invariant. Nothing was written.
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),
}

impl QuotaError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Label used for the outcome metric.
    pub(crate) fn outcome_label(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Store(_) | Self::InvariantViolated(_) => "error",
        }
    }
}
