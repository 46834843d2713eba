//! Dead-letter writes to object storage

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use phdi_core::fallback::FallbackNamespace;
use phdi_core::{Bundle, FallbackRecord, Result};

use crate::storage::ObjectStorage;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Persists undeliverable data under its fallback namespace in one bucket
#[derive(Clone)]
pub struct FallbackWriter {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl FallbackWriter {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// Write `record` as JSON to `record.path`
    pub async fn write_record(
        &self,
        namespace: FallbackNamespace,
        record: &FallbackRecord,
    ) -> Result<String> {
        let bytes = record.to_vec()?;
        self.write_raw(namespace, &record.path, Bytes::from(bytes), JSON_CONTENT_TYPE)
            .await?;
        Ok(record.path.clone())
    }

    /// Write raw bytes verbatim to `path`
    pub async fn write_raw(
        &self,
        namespace: FallbackNamespace,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let written = self
            .storage
            .write(&self.bucket, path, bytes, content_type)
            .await;

        match &written {
            Ok(()) => {
                metrics::counter!("fallback_writes_total", "namespace" => namespace.as_str())
                    .increment(1);
                tracing::warn!(bucket = %self.bucket, path, "Undelivered data written to fallback storage");
            }
            Err(e) => {
                tracing::error!(bucket = %self.bucket, path, error = %e, "Fallback write failed");
            }
        }
        written
    }

    /// Persist a bundle a caller reports as undeliverable
    pub async fn record_upload_failure(
        &self,
        source_path: &str,
        bundle: &Bundle,
        reason: &str,
    ) -> Result<String> {
        let record = FallbackRecord::reported_upload_failure(source_path, bundle, reason);
        self.write_record(FallbackNamespace::FailedUpload, &record).await
    }

    /// Persist the converter's answer for a message it could not convert
    pub async fn record_conversion_failure(
        &self,
        source_path: &str,
        converter_response: JsonValue,
    ) -> Result<String> {
        let record = FallbackRecord::conversion_failure(source_path, converter_response);
        self.write_record(FallbackNamespace::FailedConversion, &record)
            .await
    }
}
