//! Message bus abstraction and its Pub/Sub implementation

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use serde_json::json;

use phdi_core::{DeliveryError, Result};

use crate::auth::CredentialProvider;
use crate::transport::{HttpClient, HttpRequest, RetryPolicy};

/// Pub/Sub REST root
pub const PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com/v1";

/// Fully qualified topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    pub project_id: String,
    pub topic_id: String,
}

impl TopicPath {
    pub fn new(project_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topic_id: topic_id.into(),
        }
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project_id, self.topic_id)
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message, returning the id the bus assigned to it
    async fn publish(
        &self,
        topic: &TopicPath,
        payload: &[u8],
        attributes: &BTreeMap<String, String>,
    ) -> Result<String>;
}

/// Google Cloud Pub/Sub over REST.
///
/// Issues a single HTTP attempt per call; the publisher owns message-level retry.
pub struct PubSubPublisher {
    client: HttpClient,
    credentials: Arc<CredentialProvider>,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_ids: Vec<String>,
}

impl PubSubPublisher {
    pub fn new(client: HttpClient, credentials: Arc<CredentialProvider>) -> Self {
        Self::with_base_url(client, credentials, PUBSUB_BASE_URL)
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
        }
    }
}

#[async_trait]
impl MessageBus for PubSubPublisher {
    async fn publish(
        &self,
        topic: &TopicPath,
        payload: &[u8],
        attributes: &BTreeMap<String, String>,
    ) -> Result<String> {
        let body = json!({
            "messages": [{
                "data": BASE64.encode(payload),
                "attributes": attributes,
            }]
        });

        let token = self.credentials.get_token().await?;
        let authorization = HeaderValue::from_str(&token.bearer())
            .map_err(|e| DeliveryError::auth(format!("token is not a valid header value: {e}")))?;
        let request = HttpRequest::post(
            format!("{}/{topic}:publish", self.base_url),
            body.to_string(),
        )
        .with_header(AUTHORIZATION, authorization)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .execute_with_reauth(
                &self.credentials,
                &request,
                &RetryPolicy::new(0, vec![Method::POST]),
            )
            .await?
            .into_success()
            .map_err(|e| DeliveryError::publish(e.to_string()))?;

        let parsed: PublishResponse = serde_json::from_slice(&response.body)
            .map_err(|e| DeliveryError::publish(format!("malformed publish response: {e}")))?;
        parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| DeliveryError::publish("publish response carried no message id"))
    }
}

/// In-memory bus for tests and local runs
pub mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PublishedMessage {
        pub message_id: String,
        pub topic: TopicPath,
        pub payload: Vec<u8>,
        pub attributes: BTreeMap<String, String>,
    }

    /// Records every accepted publish; can reject chosen calls.
    #[derive(Default)]
    pub struct MemoryBus {
        published: RwLock<Vec<PublishedMessage>>,
        failing_markers: RwLock<Vec<String>>,
        fail_first: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl MemoryBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject every publish whose payload contains `marker`
        pub async fn fail_matching(&self, marker: &str) {
            self.failing_markers.write().await.push(marker.to_string());
        }

        /// Reject the next `n` publishes regardless of payload
        pub fn fail_first_attempts(&self, n: usize) {
            self.fail_first.store(n, Ordering::SeqCst);
        }

        pub async fn published(&self) -> Vec<PublishedMessage> {
            self.published.read().await.clone()
        }

        /// Publish calls seen, accepted or not
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageBus for MemoryBus {
        async fn publish(
            &self,
            topic: &TopicPath,
            payload: &[u8],
            attributes: &BTreeMap<String, String>,
        ) -> Result<String> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DeliveryError::publish("injected failure"));
            }

            let text = String::from_utf8_lossy(payload);
            let rejected = self
                .failing_markers
                .read()
                .await
                .iter()
                .any(|marker| text.contains(marker.as_str()));
            if rejected {
                return Err(DeliveryError::publish("injected failure"));
            }

            let message_id = format!("msg-{attempt}");
            self.published.write().await.push(PublishedMessage {
                message_id: message_id.clone(),
                topic: topic.clone(),
                payload: payload.to_vec(),
                attributes: attributes.clone(),
            });
            Ok(message_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBus;
    use super::*;

    #[test]
    fn topic_path_display() {
        assert_eq!(
            TopicPath::new("phdi-project", "ingestion").to_string(),
            "projects/phdi-project/topics/ingestion"
        );
    }

    #[tokio::test]
    async fn memory_bus_fails_first_attempts_then_accepts() {
        let bus = MemoryBus::new();
        bus.fail_first_attempts(1);
        let topic = TopicPath::new("p", "t");

        assert!(bus.publish(&topic, b"a", &BTreeMap::new()).await.is_err());
        let id = bus.publish(&topic, b"a", &BTreeMap::new()).await.unwrap();

        assert_eq!(id, "msg-1");
        assert_eq!(bus.attempts(), 2);
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn memory_bus_rejects_marked_payloads() {
        let bus = MemoryBus::new();
        bus.fail_matching("POISON").await;
        let topic = TopicPath::new("p", "t");

        assert!(bus.publish(&topic, b"MSH|POISON", &BTreeMap::new()).await.is_err());
        assert!(bus.publish(&topic, b"MSH|fine", &BTreeMap::new()).await.is_ok());
    }
}
