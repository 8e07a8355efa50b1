//! Bearer tokens for Firestore requests.
//!
//! Service-account tokens come from `gcp_auth` and are reused until a minute
//! before they expire. The emulator takes the fixed `owner` token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

pub const EMULATOR_TOKEN: &str = "owner";

const REFRESH_AHEAD: Duration = Duration::from_secs(60);

struct Lease {
    token: String,
    expires_at: Instant,
}

impl Lease {
    fn needs_refresh(&self, now: Instant) -> bool {
        now + REFRESH_AHEAD >= self.expires_at
    }
}

/// Caches one service-account token. Concurrent callers that find it stale
/// queue on the mutex, so only the first one hits the provider.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    lease: Mutex<Option<Lease>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            lease: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        self.lease.lock().await.take();
    }

    /// Current token, fetching a new one when close to expiry. A failed fetch
    /// falls back to the old token while it is still valid.
    pub async fn token(&self) -> FirestoreResult<String> {
        let mut lease = self.lease.lock().await;
        let now = Instant::now();
        if let Some(current) = lease.as_ref().filter(|l| !l.needs_refresh(now)) {
            return Ok(current.token.clone());
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(fresh) => {
                // Already-expired tokens get a zero lifetime and are
                // replaced on the next call.
                let lifetime = (fresh.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let token = fresh.as_str().to_string();
                *lease = Some(Lease {
                    token: token.clone(),
                    expires_at: now + lifetime,
                });
                debug!(lifetime_secs = lifetime.as_secs(), "Fetched Firestore access token");
                Ok(token)
            }
            Err(e) => match lease.as_ref().filter(|l| now < l.expires_at) {
                Some(current) => {
                    warn!(error = %e, "Token refresh failed, reusing unexpired token");
                    Ok(current.token.clone())
                }
                None => Err(FirestoreError::auth_error(format!(
                    "could not obtain access token: {}",
                    e
                ))),
            },
        }
    }
}

/// Token source for a client.
#[derive(Clone)]
pub enum Credentials {
    ServiceAccount(Arc<TokenCache>),
    Static(String),
}

impl Credentials {
    pub fn emulator() -> Self {
        Self::Static(EMULATOR_TOKEN.to_string())
    }

    pub async fn token(&self) -> FirestoreResult<String> {
        match self {
            Self::ServiceAccount(cache) => cache.token().await,
            Self::Static(token) => Ok(token.clone()),
        }
    }

    /// Forget the cached token. False when the source cannot be refreshed.
    pub async fn invalidate(&self) -> bool {
        match self {
            Self::ServiceAccount(cache) => {
                cache.invalidate().await;
                true
            }
            Self::Static(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_refreshes_ahead_of_expiry() {
        let now = Instant::now();
        let lease = Lease {
            token: "t".to_string(),
            expires_at: now + Duration::from_secs(90),
        };
        assert!(!lease.needs_refresh(now));
        assert!(lease.needs_refresh(now + Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_emulator_credentials_are_fixed() {
        let creds = Credentials::emulator();
        assert_eq!(creds.token().await.unwrap(), EMULATOR_TOKEN);
        assert!(!creds.invalidate().await);
    }
}
