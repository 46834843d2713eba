//! Dead-letter records and where they are written

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::bundle::Bundle;
use crate::error::DeliveryError;
use crate::outcome::UploadResult;

/// Storage namespaces for undeliverable data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackNamespace {
    /// Bundles the FHIR store did not fully accept
    FailedUpload,
    /// Messages the bus did not accept
    PublishingFailures,
    /// Source messages the converter could not turn into FHIR
    FailedConversion,
}

impl FallbackNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailedUpload => "failed-upload",
            Self::PublishingFailures => "publishing-failures",
            Self::FailedConversion => "failed-conversion",
        }
    }
}

/// Swap the leading segment of `source_path` for `namespace`.
///
/// A path with a single segment is kept whole under the namespace.
pub fn rebase(source_path: &str, namespace: FallbackNamespace) -> String {
    let trimmed = source_path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((_, rest)) => format!("{}/{rest}", namespace.as_str()),
        None => format!("{}/{trimmed}", namespace.as_str()),
    }
}

/// `source-data/elr/a.hl7` -> `failed-upload/elr/a.hl7.json`
pub fn upload_failure_path(source_path: &str) -> String {
    format!("{}.json", rebase(source_path, FallbackNamespace::FailedUpload))
}

/// `source-data/elr/a.hl7` -> `failed-conversion/elr/a.hl7.json`
pub fn conversion_failure_path(source_path: &str) -> String {
    format!(
        "{}.json",
        rebase(source_path, FallbackNamespace::FailedConversion)
    )
}

/// `source-data/elr/batch.hl7`, 3 -> `publishing-failures/elr/batch-3.hl7`
pub fn publish_failure_path(source_path: &str, index: usize) -> String {
    let rebased = rebase(source_path, FallbackNamespace::PublishingFailures);
    let (dir, file) = match rebased.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, rebased.as_str()),
    };

    // A leading dot marks a hidden file, not an extension
    let indexed = match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{index}{}", &file[..dot], &file[dot..]),
        _ => format!("{file}-{index}"),
    };

    match dir {
        Some(dir) => format!("{dir}/{indexed}"),
        None => indexed,
    }
}

/// A persisted upload or conversion failure.
///
/// Holds the undelivered bundle verbatim plus whatever the sink told us,
/// so the record can be replayed or inspected later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    /// Storage path the record is written to
    pub path: String,
    pub source_path: String,
    pub failed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
}

impl FallbackRecord {
    /// Record for a bundle the store did not fully accept
    pub fn upload_failure(source_path: &str, bundle: &Bundle, result: &UploadResult) -> Self {
        Self {
            path: upload_failure_path(source_path),
            source_path: source_path.to_string(),
            failed_at: Utc::now(),
            status_code: result.status_code,
            response_body: result.response_body.clone(),
            reason: result.transport_error.clone(),
            bundle: Some(bundle.clone()),
        }
    }

    /// Record for a bundle the caller reports as undeliverable
    pub fn reported_upload_failure(source_path: &str, bundle: &Bundle, reason: &str) -> Self {
        Self {
            path: upload_failure_path(source_path),
            source_path: source_path.to_string(),
            failed_at: Utc::now(),
            status_code: None,
            response_body: None,
            reason: Some(reason.to_string()),
            bundle: Some(bundle.clone()),
        }
    }

    /// Record for a message the converter rejected
    pub fn conversion_failure(source_path: &str, converter_response: JsonValue) -> Self {
        Self {
            path: conversion_failure_path(source_path),
            source_path: source_path.to_string(),
            failed_at: Utc::now(),
            status_code: None,
            response_body: Some(converter_response),
            reason: None,
            bundle: None,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(self)
            .map_err(|e| DeliveryError::storage(format!("Cannot serialize fallback record: {e}")))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DeliveryError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DeliveryError::validation(format!("Malformed fallback record: {e}")))
    }
}
