//! Backend selection and local-to-remote migration.
//!
//! Each user lives in exactly one backend. The per-user migration flag kept by
//! the local store decides which; `migrate` is the only thing that flips it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use watchtime_models::{QuotaPolicy, QuotaRecord};

use crate::clock::Clock;
use crate::engine::QuotaEngine;
use crate::error::{StoreError, StoreResult};
use crate::store::{LocalQuotaStore, QuotaStore};

/// Result of [`BackendSelector::migrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The local record was copied to the remote store.
    Migrated,
    /// The remote store already had an authoritative record; it was left alone.
    AlreadyPresent,
    /// The flag was already set; nothing was read or written.
    AlreadyMigrated,
}

/// Hands out the store a user's record lives in.
#[derive(Clone)]
pub struct BackendSelector {
    local: Arc<LocalQuotaStore>,
    remote: Option<Arc<dyn QuotaStore>>,
    policy: QuotaPolicy,
}

impl BackendSelector {
    pub fn new(
        local: Arc<LocalQuotaStore>,
        remote: Option<Arc<dyn QuotaStore>>,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            local,
            remote,
            policy,
        }
    }

    pub fn local(&self) -> &Arc<LocalQuotaStore> {
        &self.local
    }

    fn remote(&self) -> StoreResult<&Arc<dyn QuotaStore>> {
        self.remote
            .as_ref()
            .ok_or_else(|| StoreError::unavailable("remote backend is not configured"))
    }

    /// Store holding `user_id`'s record.
    ///
    /// A migrated user with no remote configured is an error rather than a
    /// silent switch back to the stale local copy.
    pub async fn store_for(&self, user_id: &str) -> StoreResult<Arc<dyn QuotaStore>> {
        if self.local.is_migrated(user_id).await? {
            let remote = self.remote()?;
            debug!(user_id = %user_id, backend = remote.backend_name(), "Selected remote backend");
            return Ok(Arc::clone(remote));
        }
        let local: Arc<dyn QuotaStore> = self.local.clone();
        Ok(local)
    }

    pub async fn engine_for(
        &self,
        user_id: &str,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<QuotaEngine> {
        let store = self.store_for(user_id).await?;
        Ok(QuotaEngine::new(store, clock, self.policy.clone(), user_id))
    }

    /// Copy the user's local record to the remote store once.
    ///
    /// The remote store decides whether its existing record wins; see
    /// [`QuotaStore::import`]. Values are clamped into the current policy's
    /// ranges on the way. The flag is set in every
    /// case that reaches the remote store successfully.
    pub async fn migrate(&self, user_id: &str) -> StoreResult<MigrationOutcome> {
        let remote = self.remote()?;

        if self.local.is_migrated(user_id).await? {
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        let record = match self.local.get(user_id).await? {
            Some(local) => local.sanitized(&self.policy),
            None => QuotaRecord::new(&self.policy),
        };

        let written = remote.import(user_id, &record).await?;

        self.local.set_migrated(user_id, true).await?;

        let outcome = if written {
            MigrationOutcome::Migrated
        } else {
            MigrationOutcome::AlreadyPresent
        };
        info!(
            user_id = %user_id,
            backend = remote.backend_name(),
            outcome = ?outcome,
            "Migrated watch-time record"
        );
        Ok(outcome)
    }
}
