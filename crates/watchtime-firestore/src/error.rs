//! Errors raised by the Firestore client and quota repository.

use thiserror::Error;

pub type FirestoreResult<T> = Result<T, FirestoreError>;

/// Firestore rejects bursts with 429 but sends no `Retry-After`; one second
/// is the minimum backoff it documents.
const RATE_LIMIT_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum FirestoreError {
    #[error("firestore auth: {0}")]
    AuthError(String),

    #[error("firestore document missing: {0}")]
    NotFound(String),

    #[error("firestore document exists: {0}")]
    AlreadyExists(String),

    #[error("firestore permission denied: {0}")]
    PermissionDenied(String),

    #[error("firestore request rejected: {0}")]
    RequestFailed(String),

    #[error("firestore server error {0}: {1}")]
    ServerError(u16, String),

    #[error("firestore rate limited, back off {0}ms")]
    RateLimited(u64),

    #[error("firestore transport: {0}")]
    Network(#[from] reqwest::Error),

    #[error("firestore payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The document changed since it was read.
    #[error("firestore precondition failed: {0}")]
    PreconditionFailed(String),

    /// Optimistic update kept conflicting.
    #[error("firestore update abandoned after {0} conflicting attempts")]
    TransactionAborted(u32),
}

impl FirestoreError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Classify a non-success REST response.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 => Self::AuthError(msg),
            403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            409 => Self::AlreadyExists(msg),
            412 => Self::PreconditionFailed(msg),
            429 => Self::RateLimited(RATE_LIMIT_BACKOFF_MS),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(msg),
        }
    }

    /// Status label used for request metrics.
    pub fn http_status(&self) -> Option<u16> {
        let status = match self {
            Self::AuthError(_) => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::RateLimited(_) => 429,
            Self::ServerError(code, _) => *code,
            Self::Network(e) => return e.status().map(|s| s.as_u16()),
            _ => return None,
        };
        Some(status)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Transient failures worth repeating the same request for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::ServerError(..)
        )
    }

    /// Stale `updateTime`. Production Firestore reports this as a 400 with
    /// `FAILED_PRECONDITION` in the body rather than a 412.
    pub fn is_precondition_failed(&self) -> bool {
        match self {
            Self::PreconditionFailed(_) => true,
            Self::RequestFailed(body) => body.contains("FAILED_PRECONDITION"),
            _ => false,
        }
    }
}
