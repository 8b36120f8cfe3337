//! Bucket REST client.
//!
//! Uploads go to `POST {base}/storage/v1/object/{bucket}/{name}` with
//! `x-upsert: true`; public objects are served from
//! `{base}/storage/v1/object/public/{bucket}/{name}`.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use pagecast_shared::{Artifact, PagecastError, Result, StorageConfig, StoredArtifact, read_secret};

use crate::ArtifactStore;

/// Error bodies the storage service returns. Field names vary by version.
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Artifact store backed by a remote storage bucket.
#[derive(Clone)]
pub struct BucketStore {
    http: Client,
    base_url: Url,
    bucket: String,
    api_key: String,
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("base_url", &self.base_url.as_str())
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl BucketStore {
    /// Build a store sharing `http`, with an explicit service key.
    pub fn new(http: Client, config: &StorageConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            PagecastError::config(format!("invalid storage.base_url '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PagecastError::config(format!(
                "storage.base_url '{}' cannot carry a path",
                config.base_url
            )));
        }
        if config.bucket.trim().is_empty() {
            return Err(PagecastError::config("storage.bucket must not be empty"));
        }
        Ok(Self {
            http,
            base_url,
            bucket: config.bucket.clone(),
            api_key: api_key.into(),
        })
    }

    /// Build a store reading the service key from `config.api_key_env`.
    pub fn from_config(http: Client, config: &StorageConfig) -> Result<Self> {
        let key = read_secret(&config.api_key_env)?;
        Self::new(http, config, key)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["storage", "v1", "object"])
                .extend(segments);
        }
        url
    }

    fn upload_url(&self, filename: &str) -> Url {
        self.object_url(&[self.bucket.as_str(), filename])
    }
}

/// Turn a non-success upload response into an error carrying the service message.
async fn upload_error(filename: &str, response: reqwest::Response) -> PagecastError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServiceError>(&body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or_else(|| body.trim().to_string());
    warn!(filename, %status, message = %message, "storage rejected upload");
    PagecastError::Upload(format!("storing {filename} failed ({status}): {message}"))
}

#[async_trait]
impl ArtifactStore for BucketStore {
    #[instrument(skip_all, fields(filename = %artifact.filename, bucket = %self.bucket))]
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact> {
        let url = self.upload_url(&artifact.filename);
        debug!(%url, bytes = artifact.bytes.len(), "uploading artifact");

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header("apikey", &self.api_key)
            .header(CONTENT_TYPE, artifact.content_type)
            .header("x-upsert", "true")
            .body(artifact.bytes.clone())
            .send()
            .await
            .map_err(|e| {
                PagecastError::Upload(format!("storing {} failed: {e}", artifact.filename))
            })?;

        if !response.status().is_success() {
            return Err(upload_error(&artifact.filename, response).await);
        }

        let stored = StoredArtifact {
            filename: artifact.filename.clone(),
            public_url: self.public_url(&artifact.filename),
        };
        info!(public_url = %stored.public_url, "artifact uploaded");
        Ok(stored)
    }

    fn public_url(&self, filename: &str) -> String {
        self.object_url(&["public", self.bucket.as_str(), filename]).into()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(base: &str) -> StorageConfig {
        StorageConfig {
            base_url: base.to_string(),
            bucket: "pdfs".into(),
            api_key_env: "PAGECAST_TEST_UNSET_STORAGE_KEY".into(),
        }
    }

    fn artifact() -> Artifact {
        Artifact::pdf(b"%PDF-1.3 test".to_vec(), 1_700_000_000_000)
    }

    #[test]
    fn public_url_is_deterministic() {
        let store = BucketStore::new(Client::new(), &config("https://store.example.com/"), "k")
            .unwrap();
        assert_eq!(
            store.public_url("extracted-1.pdf"),
            "https://store.example.com/storage/v1/object/public/pdfs/extracted-1.pdf"
        );
        assert_eq!(store.public_url("a.pdf"), store.public_url("a.pdf"));
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let err = BucketStore::new(Client::new(), &config("not a url"), "k").unwrap_err();
        assert!(matches!(err, PagecastError::Config { .. }));
    }

    #[test]
    fn missing_key_env_is_a_config_error() {
        let err = BucketStore::from_config(Client::new(), &config("http://localhost")).unwrap_err();
        assert!(err.to_string().contains("PAGECAST_TEST_UNSET_STORAGE_KEY"));
    }

    #[tokio::test]
    async fn upload_posts_with_upsert_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/pdfs/extracted-1700000000000.pdf"))
            .and(header("authorization", "Bearer secret"))
            .and(header("x-upsert", "true"))
            .and(header("content-type", "application/pdf"))
            .and(body_bytes(b"%PDF-1.3 test".to_vec()))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"Key":"pdfs/extracted.pdf"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = BucketStore::new(Client::new(), &config(&server.uri()), "secret").unwrap();
        let stored = store.upload(&artifact()).await.unwrap();

        assert_eq!(stored.filename, "extracted-1700000000000.pdf");
        assert_eq!(
            stored.public_url,
            format!(
                "{}/storage/v1/object/public/pdfs/extracted-1700000000000.pdf",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn rejected_upload_carries_service_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string(r#"{"statusCode":"403","error":"Unauthorized","message":"invalid signature"}"#),
            )
            .mount(&server)
            .await;

        let store = BucketStore::new(Client::new(), &config(&server.uri()), "bad").unwrap();
        let err = store.upload(&artifact()).await.unwrap_err();

        assert!(matches!(err, PagecastError::Upload(_)));
        assert!(err.to_string().contains("invalid signature"), "{err}");
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_upload_error() {
        // Nothing listens on the discard port.
        let store = BucketStore::new(Client::new(), &config("http://127.0.0.1:9"), "k").unwrap();
        let err = store.upload(&artifact()).await.unwrap_err();
        assert!(matches!(err, PagecastError::Upload(_)));
    }
}
