//! Watch-time quota repository.
//!
//! Each user has a single document at `users/{user_id}/watchTimeData/data`.
//! All writes go through [`QuotaDocumentRepository::update_with_retry`], an
//! optimistic read-modify-write keyed on the document's `updateTime`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use watchtime_models::policy::DEFAULT_BASE_MINUTES;
use watchtime_models::QuotaRecord;

use crate::client::{DocumentPath, FirestoreClient};
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_conflict;
use crate::types::{Document, Fields, FieldsBuilder};

/// Sub-collection under each user document.
pub const WATCH_TIME_COLLECTION: &str = "watchTimeData";

/// Singleton document id inside [`WATCH_TIME_COLLECTION`].
pub const WATCH_TIME_DOC_ID: &str = "data";

/// Repository for per-user watch-time documents.
#[derive(Clone)]
pub struct QuotaDocumentRepository {
    client: FirestoreClient,
    max_attempts: u32,
}

impl QuotaDocumentRepository {
    /// Default number of optimistic-lock attempts per update.
    pub const MAX_UPDATE_RETRIES: u32 = 5;

    pub fn new(client: FirestoreClient) -> Self {
        Self {
            client,
            max_attempts: Self::MAX_UPDATE_RETRIES,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Location of the user's watch-time document.
    pub fn document_path(user_id: &str) -> DocumentPath {
        DocumentPath::new(
            format!("users/{}/{}", urlencoding::encode(user_id), WATCH_TIME_COLLECTION),
            WATCH_TIME_DOC_ID,
        )
    }

    async fn fetch(&self, doc: &DocumentPath) -> FirestoreResult<Option<Document>> {
        self.client
            .with_retry("get_watch_time", || self.client.get(doc))
            .await
    }

    /// Get the user's record. `None` if the user has no document yet.
    pub async fn get(&self, user_id: &str) -> FirestoreResult<Option<QuotaRecord>> {
        let doc = self.fetch(&Self::document_path(user_id)).await?;
        Ok(doc.map(|d| decode(&d).record))
    }

    /// Atomically read, mutate and write the user's record.
    ///
    /// `mutator` receives the current record (`None` if the document does not
    /// exist) and returns the replacement, or `None` to abort without writing.
    /// It is re-run against a fresh read after every precondition conflict.
    ///
    /// Returns the committed record, or `None` if the mutator aborted.
    pub async fn update_with_retry<F>(
        &self,
        user_id: &str,
        mut mutator: F,
    ) -> FirestoreResult<Option<QuotaRecord>>
    where
        F: FnMut(Option<&QuotaRecord>) -> Option<QuotaRecord>,
    {
        self.write_loop(user_id, |stored| mutator(stored.map(|s| &s.record)))
            .await
    }

    /// Seed the document with a migrated record.
    ///
    /// Writes `record` when the document is missing or was never marked
    /// `migrated`; a document that already carries the flag is authoritative
    /// and left alone. Returns whether `record` was written.
    pub async fn import(&self, user_id: &str, record: &QuotaRecord) -> FirestoreResult<bool> {
        let written = self
            .write_loop(user_id, |stored| match stored {
                Some(existing) if existing.migrated => None,
                _ => Some(record.clone()),
            })
            .await?;
        Ok(written.is_some())
    }

    async fn write_loop<F>(&self, user_id: &str, mut mutator: F) -> FirestoreResult<Option<QuotaRecord>>
    where
        F: FnMut(Option<&StoredQuota>) -> Option<QuotaRecord>,
    {
        let path = Self::document_path(user_id);
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            let doc = self.fetch(&path).await?;
            let stored = doc.as_ref().map(decode);
            let update_time = doc.and_then(|d| d.update_time);

            let Some(next) = mutator(stored.as_ref()) else {
                debug!(user_id = %user_id, "Watch-time mutation aborted, nothing written");
                return Ok(None);
            };

            let fields = record_to_fields(&next, Utc::now());

            // No updateTime means no document yet; creation fails if another
            // writer got there first.
            let result = match update_time.as_deref() {
                None => self.client.create(&path, fields).await,
                Some(ts) => self.client.patch(&path, fields, Some(ts)).await,
            };

            match result {
                Ok(_) => return Ok(Some(next)),
                Err(e) if e.is_precondition_failed() || matches!(e, FirestoreError::AlreadyExists(_)) => {
                    debug!(
                        user_id = %user_id,
                        attempt = attempt + 1,
                        "Watch-time update conflicted, re-reading"
                    );
                    record_conflict(WATCH_TIME_COLLECTION);
                    last_error = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            user_id = %user_id,
            attempts = self.max_attempts,
            "Watch-time update gave up: {:?}",
            last_error
        );
        Err(FirestoreError::TransactionAborted(self.max_attempts))
    }
}

/// A decoded document: the record plus the migration marker.
struct StoredQuota {
    record: QuotaRecord,
    migrated: bool,
}

fn record_to_fields(record: &QuotaRecord, now: DateTime<Utc>) -> Fields {
    FieldsBuilder::new()
        .set("base_limit_minutes", &record.base_limit_minutes)
        .set("applied_bonus_minutes", &record.applied_bonus_minutes)
        .set("wallet_minutes", &record.wallet_minutes)
        .set("used_millis", &record.used_millis)
        .set("last_reset_at", &record.last_reset_at)
        .set("unlock_ad_count", &record.unlock_ad_count)
        .set("unlock_started_at", &record.unlock_started_at)
        .set("migrated", &true)
        .set("updated_at", &now)
        .build()
}

// Missing fields take their defaults. Firestore omits `fields` entirely for
// an empty document, which then decodes as a fresh record.
fn decode(doc: &Document) -> StoredQuota {
    let record = QuotaRecord {
        base_limit_minutes: doc
            .get("base_limit_minutes")
            .unwrap_or(DEFAULT_BASE_MINUTES),
        applied_bonus_minutes: doc.get("applied_bonus_minutes").unwrap_or(0),
        wallet_minutes: doc.get("wallet_minutes").unwrap_or(0),
        used_millis: doc.get("used_millis").unwrap_or(0),
        last_reset_at: doc.get("last_reset_at"),
        unlock_ad_count: doc.get("unlock_ad_count").unwrap_or(0),
        unlock_started_at: doc.get("unlock_started_at"),
    };
    StoredQuota {
        record,
        migrated: doc.get("migrated").unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use serde_json::json;
    use watchtime_models::QuotaPolicy;
    use wiremock::matchers::{method, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PATH: &str = r"/users/kid-1/watchTimeData/data$";

    async fn repo(server: &MockServer) -> QuotaDocumentRepository {
        let config = FirestoreConfig::emulator(server.uri(), "demo-watchtime");
        let client = FirestoreClient::new(config).await.unwrap();
        QuotaDocumentRepository::new(client)
    }

    fn stored_doc(wallet: u32) -> serde_json::Value {
        json!({
            "name": "projects/demo-watchtime/databases/(default)/documents/users/kid-1/watchTimeData/data",
            "fields": {
                "base_limit_minutes": { "integerValue": "60" },
                "applied_bonus_minutes": { "integerValue": "0" },
                "wallet_minutes": { "integerValue": wallet.to_string() },
                "used_millis": { "integerValue": "1000" },
                "last_reset_at": { "timestampValue": "2026-10-16T00:05:00Z" },
                "unlock_ad_count": { "integerValue": "0" },
                "unlock_started_at": { "nullValue": null }
            },
            "updateTime": "2026-10-16T08:00:00.123456Z"
        })
    }

    #[test]
    fn test_record_fields_round_trip() {
        let mut record = QuotaRecord::new(&QuotaPolicy::default());
        record.wallet_minutes = 45;
        record.unlock_ad_count = 2;
        record.unlock_started_at = Some(Utc::now());

        let doc = Document::new(record_to_fields(&record, Utc::now()));
        let stored = decode(&doc);
        assert!(stored.migrated);
        let back = stored.record;

        assert_eq!(back.wallet_minutes, 45);
        assert_eq!(back.unlock_ad_count, 2);
        assert!(back.unlock_started_at.is_some());
        assert!(back.last_reset_at.is_none());
    }

    #[test]
    fn test_user_id_is_encoded_in_path() {
        assert_eq!(
            QuotaDocumentRepository::document_path("a/b").to_string(),
            "users/a%2Fb/watchTimeData/data"
        );
    }

    #[tokio::test]
    async fn test_get_missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        assert!(repo.get("kid-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_uses_update_time_precondition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(15)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(DOC_PATH))
            .and(query_param(
                "currentDocument.updateTime",
                "2026-10-16T08:00:00.123456Z",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(30)))
            .expect(1)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let committed = repo
            .update_with_retry("kid-1", |current| {
                let mut next = current?.clone();
                next.wallet_minutes += 15;
                Some(next)
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(committed.wallet_minutes, 30);
        assert_eq!(committed.used_millis, 1000);
    }

    #[tokio::test]
    async fn test_aborted_mutation_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(15)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let result = repo.update_with_retry("kid-1", |_| None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_missing_document_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/users/kid-1/watchTimeData$"))
            .and(query_param("documentId", "data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(0)))
            .expect(1)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let policy = QuotaPolicy::default();
        let committed = repo
            .update_with_retry("kid-1", |current| {
                assert!(current.is_none());
                Some(QuotaRecord::new(&policy))
            })
            .await
            .unwrap();

        assert_eq!(committed, Some(QuotaRecord::new(&policy)));
    }

    #[tokio::test]
    async fn test_conflicts_rerun_mutation_then_give_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(15)))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(412).set_body_string("FAILED_PRECONDITION"))
            .expect(3)
            .mount(&server)
            .await;

        let repo = repo(&server).await.with_max_attempts(3);
        let mut runs = 0;
        let result = repo
            .update_with_retry("kid-1", |current| {
                runs += 1;
                current.cloned()
            })
            .await;

        assert!(matches!(result, Err(FirestoreError::TransactionAborted(3))));
        assert_eq!(runs, 3);
    }

    #[tokio::test]
    async fn test_document_without_fields_reads_as_defaults_and_is_repaired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo-watchtime/databases/(default)/documents/users/kid-1/watchTimeData/data",
                "updateTime": "2026-10-16T08:00:00Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(DOC_PATH))
            .and(query_param("currentDocument.updateTime", "2026-10-16T08:00:00Z"))
            .and(query_param("updateMask.fieldPaths", "wallet_minutes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(15)))
            .expect(1)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let policy = QuotaPolicy::default();
        let current = repo.get("kid-1").await.unwrap().unwrap();
        assert_eq!(current, QuotaRecord::new(&policy));

        let committed = repo
            .update_with_retry("kid-1", |current| {
                let mut next = current?.clone();
                next.wallet_minutes += policy.wallet_earn_per_ad;
                Some(next)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.wallet_minutes, 15);
    }

    #[tokio::test]
    async fn test_import_skips_document_already_marked_migrated() {
        let server = MockServer::start().await;
        let mut flagged = stored_doc(90);
        flagged["fields"]["migrated"] = json!({ "booleanValue": true });
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(flagged))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let record = QuotaRecord::new(&QuotaPolicy::default());
        assert!(!repo.import("kid-1", &record).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_overwrites_unflagged_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(90)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(DOC_PATH))
            .and(query_param(
                "currentDocument.updateTime",
                "2026-10-16T08:00:00.123456Z",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_doc(15)))
            .expect(1)
            .mount(&server)
            .await;

        let repo = repo(&server).await;
        let record = QuotaRecord {
            wallet_minutes: 15,
            ..QuotaRecord::new(&QuotaPolicy::default())
        };
        assert!(repo.import("kid-1", &record).await.unwrap());
    }
}
