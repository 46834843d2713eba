//! Object storage abstraction.
//!
//! Production code talks to Cloud Storage through [`GcsStorage`]; tests use
//! [`memory::MemoryStorage`] to observe every write without a network.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Url};

use phdi_core::{DeliveryError, Result};

use crate::auth::CredentialProvider;
use crate::transport::{HttpClient, HttpRequest, RetryPolicy};

/// Cloud Storage JSON API root
pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Durable object storage, as consumed by ingestion and fallback writes
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn read(&self, bucket: &str, path: &str) -> Result<Bytes>;

    async fn write(&self, bucket: &str, path: &str, bytes: Bytes, content_type: &str)
    -> Result<()>;
}

/// Cloud Storage over its JSON API
pub struct GcsStorage {
    client: HttpClient,
    credentials: Arc<CredentialProvider>,
    base_url: String,
    policy: RetryPolicy,
}

impl GcsStorage {
    pub fn new(client: HttpClient, credentials: Arc<CredentialProvider>) -> Self {
        Self::with_base_url(client, credentials, GCS_BASE_URL)
    }

    pub fn with_base_url(
        client: HttpClient,
        credentials: Arc<CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy: RetryPolicy::new(3, vec![Method::GET, Method::POST]),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DeliveryError::config(format!("invalid storage base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| DeliveryError::config("storage base URL cannot hold a path"))?
            .extend(segments);
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    async fn authorized(&self, request: HttpRequest) -> Result<HttpRequest> {
        let token = self.credentials.get_token().await?;
        let value = HeaderValue::from_str(&token.bearer())
            .map_err(|e| DeliveryError::auth(format!("token is not a valid header value: {e}")))?;
        Ok(request.with_header(AUTHORIZATION, value))
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn read(&self, bucket: &str, path: &str) -> Result<Bytes> {
        let url = self.url(&["storage", "v1", "b", bucket, "o", path], &[("alt", "media")])?;
        let request = self
            .authorized(HttpRequest::new(Method::GET, url.as_str()))
            .await?;

        let response = self
            .client
            .execute_with_reauth(&self.credentials, &request, &self.policy)
            .await?
            .into_success()
            .map_err(|e| DeliveryError::storage(format!("read gs://{bucket}/{path}: {e}")))?;
        Ok(response.body)
    }

    async fn write(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let url = self.url(
            &["upload", "storage", "v1", "b", bucket, "o"],
            &[("uploadType", "media"), ("name", path)],
        )?;
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| DeliveryError::validation(format!("invalid content type: {e}")))?;
        let request = self
            .authorized(HttpRequest::post(url.as_str(), bytes).with_header(CONTENT_TYPE, content_type))
            .await?;

        self.client
            .execute_with_reauth(&self.credentials, &request, &self.policy)
            .await?
            .into_success()
            .map_err(|e| DeliveryError::storage(format!("write gs://{bucket}/{path}: {e}")))?;
        Ok(())
    }
}

/// In-memory storage for tests and local runs
pub mod memory {
    use std::collections::{BTreeMap, HashSet};

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoredObject {
        pub bytes: Bytes,
        pub content_type: String,
    }

    /// Objects keyed by `(bucket, path)`, with write failures on demand
    #[derive(Default)]
    pub struct MemoryStorage {
        objects: RwLock<BTreeMap<(String, String), StoredObject>>,
        failing_prefixes: RwLock<HashSet<String>>,
        writes: RwLock<Vec<(String, String)>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an object, bypassing failure injection
        pub async fn insert(&self, bucket: &str, path: &str, bytes: impl Into<Bytes>) {
            self.objects.write().await.insert(
                (bucket.to_string(), path.to_string()),
                StoredObject {
                    bytes: bytes.into(),
                    content_type: "application/octet-stream".to_string(),
                },
            );
        }

        /// Fail every write whose path starts with `prefix`
        pub async fn fail_writes_under(&self, prefix: &str) {
            self.failing_prefixes.write().await.insert(prefix.to_string());
        }

        pub async fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> {
            self.objects
                .read()
                .await
                .get(&(bucket.to_string(), path.to_string()))
                .cloned()
        }

        /// Successful writes, in order, as `(bucket, path)`
        pub async fn writes(&self) -> Vec<(String, String)> {
            self.writes.read().await.clone()
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryStorage {
        async fn read(&self, bucket: &str, path: &str) -> Result<Bytes> {
            self.get(bucket, path)
                .await
                .map(|object| object.bytes)
                .ok_or_else(|| DeliveryError::storage(format!("gs://{bucket}/{path} not found")))
        }

        async fn write(
            &self,
            bucket: &str,
            path: &str,
            bytes: Bytes,
            content_type: &str,
        ) -> Result<()> {
            let failing = self
                .failing_prefixes
                .read()
                .await
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()));
            if failing {
                return Err(DeliveryError::storage(format!(
                    "injected write failure for gs://{bucket}/{path}"
                )));
            }

            let key = (bucket.to_string(), path.to_string());
            self.objects.write().await.insert(
                key.clone(),
                StoredObject {
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
            self.writes.write().await.push(key);
            Ok(())
        }
    }
}
