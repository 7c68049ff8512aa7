use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use preopen_core::config::StorageConfig;
use preopen_core::error::AppError;
use preopen_core::models::StorageKey;
use preopen_core::traits::ObjectStore;
use reqwest::{Client, Url};
use serde::Deserialize;

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Object-store client for a Supabase-style storage REST API.
///
/// Uploads go to `POST {url}/storage/v1/object/{bucket}/{key}` with
/// `x-upsert: true`, so writing an existing key replaces it.
///
/// Missing credentials are only reported at upload time: a store built
/// from a half-configured [`StorageConfig`] still attempts the call path
/// and fails with [`AppError::UploadError`].
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: Option<String>,
    api_key: Option<String>,
    bucket: String,
    timeout_secs: u64,
}

impl HttpObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, AppError> {
        Self::with_timeout(config, DEFAULT_UPLOAD_TIMEOUT)
    }

    pub fn with_timeout(config: &StorageConfig, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("preopen/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::UploadError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config
                .url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: config.key.clone(),
            bucket: config.bucket.clone(),
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Full object URL for `key`, with every path segment percent-encoded.
    fn object_url(&self, base: &str, key: &StorageKey) -> Result<Url, AppError> {
        let mut url = Url::parse(base)
            .map_err(|e| AppError::UploadError(format!("Invalid storage URL '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::UploadError(format!("Storage URL '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend(["storage", "v1", "object", self.bucket.as_str()])
            .extend(key.as_str().split('/'));
        Ok(url)
    }
}

// ---- Storage API types ----

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::UploadError("STORAGE_URL not set".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::UploadError("STORAGE_KEY not set".into()))?;

        let url = self.object_url(base, key)?;
        let encoded_metadata = STANDARD.encode(serde_json::to_vec(metadata)?);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("apikey", api_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .header("x-metadata", encoded_metadata)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UploadError(format!("Upload timed out after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    AppError::UploadError(format!("Connection failed: {e}"))
                } else {
                    AppError::UploadError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            let message = serde_json::from_str::<ApiError>(&body)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or(body);

            return Err(AppError::UploadError(format!("HTTP {status_code}: {message}")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use preopen_core::config::PipelineConfig;
    use preopen_core::models::{FailureKind, RunOutcome, RunState};
    use preopen_core::testutil::{MockSession, MockSessionProvider};
    use preopen_core::{Archiver, Pipeline};
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key() -> StorageKey {
        StorageKey::new(
            "pre-open-market",
            NaiveDate::from_ymd_opt(2024, 9, 24).unwrap(),
            "preopen_20240924.csv",
        )
    }

    fn config(url: Option<String>, key: Option<&str>) -> StorageConfig {
        StorageConfig {
            url,
            key: key.map(str::to_string),
            bucket: "market-data".into(),
        }
    }

    fn metadata() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("origin".to_string(), "preopen-archiver".to_string());
        m.insert("size_bytes".to_string(), "4".to_string());
        m
    }

    #[tokio::test]
    async fn uploads_with_upsert_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/storage/v1/object/market-data/pre-open-market/2024-09-24/preopen_20240924.csv",
            ))
            .and(header("authorization", "Bearer secret"))
            .and(header("apikey", "secret"))
            .and(header("content-type", "text/csv"))
            .and(header("x-upsert", "true"))
            .and(body_bytes(b"a,b\n".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": "market-data/pre-open-market/2024-09-24/preopen_20240924.csv"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&config(Some(server.uri()), Some("secret"))).unwrap();
        store
            .put(&key(), b"a,b\n".to_vec(), "text/csv", &metadata())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let encoded = requests[0]
            .headers
            .get("x-metadata")
            .unwrap()
            .to_str()
            .unwrap();
        let decoded: BTreeMap<String, String> =
            serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, metadata());
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/storage/v1/object/market-data/pre-open-market/2024-09-24/preopen_20240924.csv",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/", server.uri());
        let store = HttpObjectStore::new(&config(Some(base), Some("secret"))).unwrap();

        store
            .put(&key(), b"x".to_vec(), "text/csv", &metadata())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_status_becomes_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "statusCode": "403",
                "error": "Unauthorized",
                "message": "invalid signature"
            })))
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&config(Some(server.uri()), Some("bad"))).unwrap();
        let err = store
            .put(&key(), b"x".to_vec(), "text/csv", &metadata())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadError(ref m) if m == "HTTP 403: invalid signature"));
    }

    #[tokio::test]
    async fn plain_text_error_body_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&config(Some(server.uri()), Some("k"))).unwrap();
        let err = store
            .put(&key(), b"x".to_vec(), "text/csv", &metadata())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Upload error: HTTP 500: upstream down");
    }

    #[tokio::test]
    async fn missing_key_fails_loudly() {
        let store = HttpObjectStore::new(&config(Some("https://example.supabase.co".into()), None))
            .unwrap();

        let err = store
            .put(&key(), b"x".to_vec(), "text/csv", &metadata())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadError(ref m) if m.contains("STORAGE_KEY")));
    }

    #[tokio::test]
    async fn missing_url_fails_loudly() {
        let store = HttpObjectStore::new(&config(None, Some("secret"))).unwrap();

        let err = store
            .put(&key(), b"x".to_vec(), "text/csv", &metadata())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadError(ref m) if m.contains("STORAGE_URL")));
    }

    #[tokio::test]
    async fn half_configured_storage_fails_the_run_as_partial() {
        let dir = tempfile::tempdir().unwrap();
        let session = MockSession::new();
        let store =
            HttpObjectStore::new(&config(Some("https://example.supabase.co".into()), None)).unwrap();
        let archiver = Archiver::with_store(store, "pre-open-market", "preopen-archiver");
        let pipeline_config = PipelineConfig {
            target_url: "https://example.com/pre-open".into(),
            page_settle: Duration::ZERO,
            selection_settle: Duration::ZERO,
            screenshot_dir: dir.path().join("screenshots"),
            download_dir: dir.path().join("downloads"),
            ..PipelineConfig::default()
        };

        let report = Pipeline::new(
            MockSessionProvider::new(session.clone()),
            archiver,
            &pipeline_config,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.outcome, RunOutcome::PartialFailure);
        assert_eq!(report.state(), RunState::Failed(FailureKind::Partial));
        assert!(report.error.as_deref().unwrap().contains("STORAGE_KEY not set"));
        assert!(report.storage_key.is_none());
        assert!(report.artifact.as_ref().unwrap().local_path.exists());
        assert_eq!(session.closes(), 1);
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let store = HttpObjectStore::new(&config(None, None)).unwrap();
        let key = StorageKey::new(
            "pre-open-market",
            NaiveDate::from_ymd_opt(2024, 9, 24).unwrap(),
            "pre open.csv",
        );
        let url = store.object_url("https://x.supabase.co", &key).unwrap();
        assert_eq!(
            url.as_str(),
            "https://x.supabase.co/storage/v1/object/market-data/pre-open-market/2024-09-24/pre%20open.csv"
        );
    }
}
