use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::bundle::ResponseInspection;
use crate::error::DeliveryError;

/// A bundle entry the FHIR store did not accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResource {
    /// Zero-based position of the entry in the submitted bundle
    pub index: usize,
    /// 3-digit status reported for the entry
    pub status: u16,
}

/// Result of one bundle upload.
///
/// `failed_resources` is only ever populated when the store answered the
/// batch itself with HTTP 200.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub failed: bool,

    /// Store status; `None` when no response was obtained
    pub status_code: Option<u16>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_resources: Vec<FailedResource>,

    /// Full store response on success, failing subset or error body otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,

    /// Where the undelivered bundle was persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_path: Option<String>,
}

impl UploadResult {
    pub fn delivered(response_body: JsonValue) -> Self {
        Self {
            failed: false,
            status_code: Some(200),
            failed_resources: Vec::new(),
            response_body: Some(response_body),
            transport_error: None,
            fallback_path: None,
        }
    }

    /// Batch accepted but some entries rejected
    pub fn partial(inspection: ResponseInspection) -> Self {
        Self {
            failed: true,
            status_code: Some(200),
            failed_resources: inspection.failed_resources,
            response_body: Some(inspection.failing_subset),
            transport_error: None,
            fallback_path: None,
        }
    }

    /// Store answered with a non-200 status
    pub fn rejected(status: u16, body: JsonValue) -> Self {
        Self {
            failed: true,
            status_code: Some(status),
            failed_resources: Vec::new(),
            response_body: Some(body),
            transport_error: None,
            fallback_path: None,
        }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            failed: true,
            status_code: None,
            failed_resources: Vec::new(),
            response_body: None,
            transport_error: Some(message.into()),
            fallback_path: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        !self.failed
    }

    /// The error this result stands for, if it failed
    pub fn error(&self) -> Option<DeliveryError> {
        if !self.failed {
            return None;
        }
        if !self.failed_resources.is_empty() {
            return Some(DeliveryError::partial_bundle_failure(
                self.failed_resources.len(),
            ));
        }
        match self.status_code {
            Some(status) => Some(DeliveryError::http(
                status,
                self.response_body
                    .as_ref()
                    .map(JsonValue::to_string)
                    .unwrap_or_default(),
            )),
            None => Some(DeliveryError::transport(
                self.transport_error.clone().unwrap_or_default(),
            )),
        }
    }
}

/// What happened to one split message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        index: usize,
        message_id: String,
    },
    /// Retries exhausted, raw message persisted at `path`
    FallbackWritten {
        index: usize,
        path: String,
        reason: String,
    },
    /// Retries exhausted and the fallback write failed as well
    Undeliverable {
        index: usize,
        reason: String,
    },
}

impl PublishOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Published { index, .. }
            | Self::FallbackWritten { index, .. }
            | Self::Undeliverable { index, .. } => *index,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use serde_json::json;

    #[test]
    fn delivered_result_has_no_error() {
        let result = UploadResult::delivered(json!({"entry": []}));
        assert!(result.is_delivered());
        assert_eq!(result.error(), None);
    }

    #[test]
    fn partial_failure_reports_partial_kind_with_outer_200() {
        let body = json!({"entry": [{"response": {"status": "200 OK"}}, {"response": {"status": "400 Bad Request"}}]});
        let result = UploadResult::partial(ResponseInspection::from_response(&body));

        assert!(result.failed);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.failed_resources, vec![FailedResource { index: 1, status: 400 }]);
        assert_eq!(result.error().map(|e| e.kind()), Some(FailureKind::PartialBundleFailure));
    }

    #[test]
    fn rejected_and_transport_results_map_to_their_kinds() {
        let rejected = UploadResult::rejected(403, json!("forbidden"));
        assert_eq!(rejected.error().map(|e| e.kind()), Some(FailureKind::Http));

        let lost = UploadResult::transport_failure("connection refused");
        assert_eq!(lost.status_code, None);
        assert_eq!(
            lost.error(),
            Some(DeliveryError::transport("connection refused"))
        );
    }

    #[test]
    fn publish_outcome_serializes_tagged() {
        let outcome = PublishOutcome::FallbackWritten {
            index: 2,
            path: "publishing-failures/elr/batch-2.hl7".to_string(),
            reason: "publish failed: unavailable".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "fallback_written");
        assert_eq!(outcome.index(), 2);
        assert!(!outcome.is_published());
    }
}
