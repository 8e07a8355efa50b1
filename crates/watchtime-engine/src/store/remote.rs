use async_trait::async_trait;

use watchtime_firestore::QuotaDocumentRepository;
use watchtime_models::QuotaRecord;

use super::{QuotaStore, RecordMutation};
use crate::error::{StoreError, StoreResult};

/// Quota store backed by Firestore optimistic transactions.
#[derive(Clone)]
pub struct FirestoreQuotaStore {
    repo: QuotaDocumentRepository,
}

impl FirestoreQuotaStore {
    pub fn new(repo: QuotaDocumentRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl QuotaStore for FirestoreQuotaStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<QuotaRecord>> {
        self.repo
            .get(user_id)
            .await
            .map_err(|e| StoreError::from_firestore(user_id, e))
    }

    async fn update(&self, user_id: &str, mutation: &mut RecordMutation<'_>) -> StoreResult<bool> {
        self.repo
            .update_with_retry(user_id, |current| mutation(current))
            .await
            .map(|committed| committed.is_some())
            .map_err(|e| StoreError::from_firestore(user_id, e))
    }

    /// Overwrites a document that was never marked migrated, so a stale copy
    /// from an earlier partial sync does not win over the local record.
    async fn import(&self, user_id: &str, record: &QuotaRecord) -> StoreResult<bool> {
        self.repo
            .import(user_id, record)
            .await
            .map_err(|e| StoreError::from_firestore(user_id, e))
    }

    fn backend_name(&self) -> &'static str {
        "firestore"
    }
}
