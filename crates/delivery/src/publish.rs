//! Splitting source blobs into messages and publishing each one.

use std::sync::Arc;

use bytes::Bytes;

use phdi_core::fallback::{FallbackNamespace, publish_failure_path};
use phdi_core::{DeliveryError, Message, PublishOutcome, Result, SourceFamily, split_messages};

use crate::bus::{MessageBus, TopicPath};
use crate::fallback::FallbackWriter;

const RAW_MESSAGE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Publishes split messages with bounded retry and dead-letters the rest.
pub struct MessagePublisher {
    bus: Arc<dyn MessageBus>,
    fallback: FallbackWriter,
    topic: TopicPath,
    retry_count: u32,
}

impl MessagePublisher {
    pub fn new(bus: Arc<dyn MessageBus>, fallback: FallbackWriter, topic: TopicPath) -> Self {
        Self {
            bus,
            fallback,
            topic,
            retry_count: 1,
        }
    }

    /// Retries after the first failed publish of a message
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Read a source object and publish every message in it
    pub async fn publish_object(&self, bucket: &str, path: &str) -> Result<Vec<PublishOutcome>> {
        SourceFamily::from_path(path)?;
        let blob = self.fallback.storage().read(bucket, path).await?;
        self.publish_all(path, &blob).await
    }

    /// Split `raw_blob` and publish each message in order.
    ///
    /// An unknown source prefix or a non-UTF-8 blob fails the whole call
    /// before anything is published or written. After that, every message
    /// yields exactly one outcome, independent of the others, unless the bus
    /// reports a credential or configuration failure: that aborts the call
    /// without retrying or dead-lettering the message at hand.
    pub async fn publish_all(
        &self,
        source_path: &str,
        raw_blob: &[u8],
    ) -> Result<Vec<PublishOutcome>> {
        let family = SourceFamily::from_path(source_path)?;
        let blob = std::str::from_utf8(raw_blob).map_err(|e| {
            DeliveryError::validation(format!("Source file '{source_path}' is not UTF-8: {e}"))
        })?;

        let messages = split_messages(family, blob);
        tracing::info!(
            source_path,
            messages = messages.len(),
            root_template = family.root_template(),
            "Publishing source messages"
        );

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            outcomes.push(self.publish_one(source_path, message).await?);
        }
        Ok(outcomes)
    }

    async fn publish_one(&self, source_path: &str, message: &Message) -> Result<PublishOutcome> {
        let payload = message.wire_payload();
        let attributes = message.metadata.attributes();

        let mut last_error = None;
        for attempt in 0..=self.retry_count {
            match self.bus.publish(&self.topic, &payload, &attributes).await {
                Ok(message_id) => {
                    metrics::counter!("messages_published_total", "result" => "published")
                        .increment(1);
                    return Ok(PublishOutcome::Published {
                        index: message.index,
                        message_id,
                    });
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        source_path,
                        index = message.index,
                        error = %e,
                        "Publishing aborted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        source_path,
                        index = message.index,
                        attempt = attempt + 1,
                        error = %e,
                        "Publish attempt failed"
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "publish failed".to_string());
        let path = publish_failure_path(source_path, message.index);
        tracing::warn!(source_path, index = message.index, %reason, "Publish retries exhausted");

        let written = self
            .fallback
            .write_raw(
                FallbackNamespace::PublishingFailures,
                &path,
                Bytes::from(message.payload.clone()),
                RAW_MESSAGE_CONTENT_TYPE,
            )
            .await;

        let outcome = match written {
            Ok(()) => {
                metrics::counter!("messages_published_total", "result" => "fallback").increment(1);
                PublishOutcome::FallbackWritten {
                    index: message.index,
                    path,
                    reason,
                }
            }
            Err(e) => {
                metrics::counter!("messages_published_total", "result" => "undeliverable")
                    .increment(1);
                PublishOutcome::Undeliverable {
                    index: message.index,
                    reason: format!("{reason}; fallback write to {path} failed: {e}"),
                }
            }
        };
        Ok(outcome)
    }
}
