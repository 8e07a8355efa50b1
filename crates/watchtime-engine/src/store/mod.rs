//! Durable per-user storage for quota records.
//!
//! Both backends expose the same atomic read-modify-write contract, so the
//! engine never knows which one it is talking to.

mod local;
mod remote;

use async_trait::async_trait;

use watchtime_models::QuotaRecord;

use crate::error::StoreResult;

pub use local::LocalQuotaStore;
pub use remote::FirestoreQuotaStore;

/// A record mutation run inside a store transaction.
///
/// Receives the stored record (`None` for a user never written) and returns
/// the replacement, or `None` to abort. Stores may run it more than once when
/// they retry after a conflict; only the last run's result is committed.
pub type RecordMutation<'a> = dyn FnMut(Option<&QuotaRecord>) -> Option<QuotaRecord> + Send + 'a;

/// Durable key-value holder for quota records, keyed by user id.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Current record, or `None` if the user has never been written.
    async fn get(&self, user_id: &str) -> StoreResult<Option<QuotaRecord>>;

    /// Apply `mutation` atomically.
    ///
    /// Returns `true` if a new record was committed and `false` if the
    /// mutation aborted. Concurrent updates for the same user never
    /// interleave.
    async fn update(&self, user_id: &str, mutation: &mut RecordMutation<'_>) -> StoreResult<bool>;

    /// Seed `user_id`'s record during migration. Returns `false` when the
    /// store already holds a record it treats as authoritative.
    ///
    /// The default writes only when no record exists.
    async fn import(&self, user_id: &str, record: &QuotaRecord) -> StoreResult<bool> {
        let mut seed = |current: Option<&QuotaRecord>| current.is_none().then(|| record.clone());
        self.update(user_id, &mut seed).await
    }

    /// Short backend name for logs and reports.
    fn backend_name(&self) -> &'static str;
}
