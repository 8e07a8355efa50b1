//! Firestore REST client.
//!
//! Thin document CRUD over the v1 REST API with bearer auth, an
//! expired-token refresh, a `firestore_request` span per call and request
//! metrics. Transport retries are opt-in through [`FirestoreClient::with_retry`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, info, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::{Credentials, TokenCache};
use crate::types::{Document, Fields};

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";
const DEFAULT_DATABASE: &str = "(default)";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Connection settings for one Firestore database.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// Emulator `host:port` or URL. When set, service-account auth is skipped.
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Read `GCP_PROJECT_ID` (or `FIREBASE_PROJECT_ID`) and the optional
    /// `FIRESTORE_*` overrides.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = non_empty_env("GCP_PROJECT_ID")
            .or_else(|| non_empty_env("FIREBASE_PROJECT_ID"))
            .ok_or_else(|| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to a non-empty project id",
                )
            })?;

        let connect_timeout_secs = non_empty_env("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Ok(Self {
            project_id,
            database_id: non_empty_env("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: non_empty_env("FIRESTORE_EMULATOR_HOST"),
        })
    }

    /// Settings for an emulator or mock server: short timeouts, no retries.
    pub fn emulator(host: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE.to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::none(),
            emulator_host: Some(host.into()),
        }
    }

    fn documents_root(&self) -> String {
        let host = match self.emulator_host.as_deref().map(|h| h.trim_end_matches('/')) {
            Some(h) if h.starts_with("http://") || h.starts_with("https://") => h.to_string(),
            Some(h) => format!("http://{}", h),
            None => PRODUCTION_HOST.to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            host, self.project_id, self.database_id
        )
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Where a document lives. `collection` may be nested, e.g. `users/u1/watchTimeData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Firestore REST client. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    root: String,
    credentials: Credentials,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let credentials = if let Some(host) = &config.emulator_host {
            info!(host = %host, "Using Firestore emulator");
            Credentials::emulator()
        } else {
            Credentials::ServiceAccount(Arc::new(TokenCache::new(service_account()?)))
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("watchtime-firestore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            root: config.documents_root(),
            config,
            credentials,
        })
    }

    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Fetch a document. `Ok(None)` if it does not exist.
    pub async fn get(&self, doc: &DocumentPath) -> FirestoreResult<Option<Document>> {
        let url = format!("{}/{}", self.root, doc);
        self.observe("get", doc, async {
            let response = self.send(Method::GET, &url, &[], None).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                _ => Err(error_from(response, doc).await),
            }
        })
        .await
    }

    /// Create a document. Fails with `AlreadyExists` if the id is taken.
    pub async fn create(&self, doc: &DocumentPath, fields: Fields) -> FirestoreResult<Document> {
        let url = format!("{}/{}", self.root, doc.collection);
        let query = [("documentId", doc.id.clone())];
        let body = Document::new(fields);
        self.observe("create", doc, async {
            let response = self.send(Method::POST, &url, &query, Some(&body)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                _ => Err(error_from(response, doc).await),
            }
        })
        .await
    }

    /// Overwrite the given fields of an existing document.
    ///
    /// With `precondition`, the write only lands if the stored document's
    /// `updateTime` still equals it; otherwise `PreconditionFailed`.
    pub async fn patch(
        &self,
        doc: &DocumentPath,
        fields: Fields,
        precondition: Option<&str>,
    ) -> FirestoreResult<Document> {
        let url = format!("{}/{}", self.root, doc);
        let mut query: Vec<(&str, String)> = fields
            .keys()
            .map(|field| ("updateMask.fieldPaths", field.clone()))
            .collect();
        if let Some(update_time) = precondition {
            query.push(("currentDocument.updateTime", update_time.to_string()));
        }
        let body = Document::new(fields);

        self.observe("patch", doc, async {
            let response = self.send(Method::PATCH, &url, &query, Some(&body)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::CONFLICT => {
                    let detail = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(format!("{}: {}", doc, detail)))
                }
                _ => Err(error_from(response, doc).await),
            }
        })
        .await
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete(&self, doc: &DocumentPath) -> FirestoreResult<()> {
        let url = format!("{}/{}", self.root, doc);
        self.observe("delete", doc, async {
            let response = self.send(Method::DELETE, &url, &[], None).await?;
            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
                _ => Err(error_from(response, doc).await),
            }
        })
        .await
    }

    /// Run `op` under this client's transport retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    /// Send one request. An expired service-account token is refreshed and
    /// the request replayed once.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Document>,
    ) -> FirestoreResult<Response> {
        let request = |token: &str| {
            let builder = self
                .http
                .request(method.clone(), url)
                .bearer_auth(token)
                .query(query);
            match body {
                Some(doc) => builder.json(doc),
                None => builder,
            }
        };

        let response = request(&self.credentials.token().await?).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        let expired = detail.contains("ACCESS_TOKEN_EXPIRED") || detail.contains("\"UNAUTHENTICATED\"");
        if expired && self.credentials.invalidate().await {
            debug!(url = %url, "Access token expired, retrying with a fresh one");
            return Ok(request(&self.credentials.token().await?).send().await?);
        }

        Err(FirestoreError::auth_error(format!("{} {}: {}", method, url, detail)))
    }

    async fn observe<T, F>(&self, operation: &'static str, doc: &DocumentPath, fut: F) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation,
            collection = %doc.collection,
            doc_id = %doc.id
        );

        let started = Instant::now();
        let result = fut.instrument(span).await;
        let status = result
            .as_ref()
            .map_or_else(|e| e.http_status().unwrap_or(500), |_| 200);
        record_request(operation, status, started.elapsed());

        result
    }
}

fn service_account() -> FirestoreResult<Arc<dyn TokenProvider>> {
    match CustomServiceAccount::from_env() {
        Ok(Some(account)) => Ok(Arc::new(account)),
        Ok(None) => Err(FirestoreError::auth_error(
            "GOOGLE_APPLICATION_CREDENTIALS must point at a service account JSON file",
        )),
        Err(e) => Err(FirestoreError::auth_error(format!(
            "Failed to load service account: {}",
            e
        ))),
    }
}

async fn error_from(response: Response, doc: &DocumentPath) -> FirestoreError {
    let status = response.status().as_u16();
    let detail = response.text().await.unwrap_or_default();
    FirestoreError::from_http_status(status, format!("{}: {}", doc, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_root_for_production() {
        let mut config = FirestoreConfig::emulator("unused", "kids-app");
        config.emulator_host = None;
        assert_eq!(
            config.documents_root(),
            "https://firestore.googleapis.com/v1/projects/kids-app/databases/(default)/documents"
        );
    }

    #[test]
    fn test_documents_root_for_emulator() {
        let config = FirestoreConfig::emulator("localhost:8080", "demo");
        assert_eq!(
            config.documents_root(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
        );

        let config = FirestoreConfig::emulator("http://127.0.0.1:9000/", "demo");
        assert!(config.documents_root().starts_with("http://127.0.0.1:9000/v1/"));
    }

    #[test]
    fn test_document_path_display() {
        let doc = DocumentPath::new("users/kid-1/watchTimeData", "data");
        assert_eq!(doc.to_string(), "users/kid-1/watchTimeData/data");
    }
}
