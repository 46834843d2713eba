//! FHIR bundle upload with partial-failure interpretation and fallback persistence.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};

use phdi_core::fallback::FallbackNamespace;
use phdi_core::{Bundle, DeliveryError, FallbackRecord, ResponseInspection, Result, UploadResult};

use crate::auth::CredentialProvider;
use crate::fallback::FallbackWriter;
use crate::transport::{HttpClient, HttpRequest, Outcome, RetryPolicy};

/// Healthcare API root the FHIR store lives under
pub const HEALTHCARE_BASE_URL: &str = "https://healthcare.googleapis.com/v1";

const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// Address of a Cloud Healthcare FHIR store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirStore {
    pub project_id: String,
    pub location: String,
    pub dataset_id: String,
    pub fhir_store_id: String,
}

impl FhirStore {
    /// FHIR endpoint of the store, below `base_url`
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/datasets/{}/fhirStores/{}/fhir",
            base_url.trim_end_matches('/'),
            self.project_id,
            self.location,
            self.dataset_id,
            self.fhir_store_id
        )
    }
}

/// Submits bundles to a FHIR store and dead-letters whatever it does not accept.
pub struct BundleUploader {
    client: HttpClient,
    credentials: Arc<CredentialProvider>,
    fallback: FallbackWriter,
    policy: RetryPolicy,
}

impl BundleUploader {
    pub fn new(
        client: HttpClient,
        credentials: Arc<CredentialProvider>,
        fallback: FallbackWriter,
    ) -> Self {
        Self {
            client,
            credentials,
            fallback,
            policy: RetryPolicy::new(3, vec![Method::POST]),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upload `bundle` to `store_url`.
    ///
    /// Transient failures are retried per the uploader's policy. Any failure
    /// that remains, including entries the store rejected inside an HTTP 200
    /// response, is written once to fallback storage and reported in the
    /// returned result. Only credential and fallback-write failures are
    /// returned as errors.
    pub async fn upload(
        &self,
        bundle: &Bundle,
        store_url: &str,
        source_path: &str,
    ) -> Result<UploadResult> {
        let token = self.credentials.get_token().await?;
        let authorization = HeaderValue::from_str(&token.bearer())
            .map_err(|e| DeliveryError::auth(format!("token is not a valid header value: {e}")))?;

        let request = HttpRequest::post(store_url, bundle.to_vec())
            .with_header(AUTHORIZATION, authorization)
            .with_header(ACCEPT, HeaderValue::from_static(FHIR_JSON))
            .with_header(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));

        let outcome = self
            .client
            .execute_with_reauth(&self.credentials, &request, &self.policy)
            .await?;

        let mut result = interpret(outcome);
        if result.failed {
            let record = FallbackRecord::upload_failure(source_path, bundle, &result);
            let path = self
                .fallback
                .write_record(FallbackNamespace::FailedUpload, &record)
                .await?;
            result.fallback_path = Some(path);
        }

        let label = if result.is_delivered() { "delivered" } else { "failed" };
        metrics::counter!("fhir_bundle_uploads_total", "result" => label).increment(1);

        Ok(result)
    }
}

fn interpret(outcome: Outcome) -> UploadResult {
    let response = match outcome {
        Outcome::TransportFailure { message } => {
            tracing::error!(error = %message, "FHIR store unreachable");
            return UploadResult::transport_failure(message);
        }
        Outcome::Response(response) => response,
    };

    if response.status != 200 {
        log_store_error(response.status, None);
        return UploadResult::rejected(response.status, response.json_or_text());
    }

    let body = response.json_or_text();
    let inspection = ResponseInspection::from_response(&body);
    if inspection.is_clean() {
        return UploadResult::delivered(body);
    }

    for failed in &inspection.failed_resources {
        log_store_error(failed.status, Some(failed.index));
    }
    metrics::counter!("fhir_bundle_entry_failures_total")
        .increment(inspection.failed_resources.len() as u64);
    UploadResult::partial(inspection)
}

fn log_store_error(status: u16, entry_index: Option<usize>) {
    let description = match status {
        401 => "Failed to authenticate.",
        403 => "User does not have permission to make that request.",
        404 => "Server or requested data not found.",
        410 => "Server has deleted this cached data.",
        _ => "",
    };

    match entry_index {
        Some(index) => tracing::error!(
            status,
            entry_index = index,
            "FHIR store rejected bundle entry. {description}"
        ),
        None => tracing::error!(status, "FHIR store rejected bundle. {description}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::transport::HttpResponse;

    fn ok(body: &str) -> Outcome {
        Outcome::Response(HttpResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    #[test]
    fn store_url_follows_healthcare_api_layout() {
        let store = FhirStore {
            project_id: "phdi".into(),
            location: "us-east4".into(),
            dataset_id: "ds".into(),
            fhir_store_id: "fs".into(),
        };
        assert_eq!(
            store.url("https://healthcare.googleapis.com/v1/"),
            "https://healthcare.googleapis.com/v1/projects/phdi/locations/us-east4/datasets/ds/fhirStores/fs/fhir"
        );
    }

    #[test]
    fn every_entry_succeeding_means_delivered() {
        let result = interpret(ok(
            r#"{"entry":[{"response":{"status":"200 OK"}},{"response":{"status":"200 OK"}}]}"#,
        ));
        assert!(result.is_delivered());
        assert!(result.failed_resources.is_empty());
    }

    #[test]
    fn one_rejected_entry_fails_the_upload() {
        let result = interpret(ok(
            r#"{"entry":[{"response":{"status":"200 OK"}},{"response":{"status":"400 Bad Request"}}]}"#,
        ));
        assert!(result.failed);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.failed_resources.len(), 1);
        assert_eq!(result.failed_resources[0].index, 1);
        assert_eq!(result.failed_resources[0].status, 400);
    }

    #[test]
    fn non_200_status_skips_entry_inspection() {
        let result = interpret(Outcome::Response(HttpResponse {
            status: 503,
            body: Bytes::from_static(br#"{"entry":[{"response":{"status":"400"}}]}"#),
        }));
        assert!(result.failed);
        assert_eq!(result.status_code, Some(503));
        assert!(result.failed_resources.is_empty());
    }

    #[test]
    fn transport_failure_has_no_status() {
        let result = interpret(Outcome::TransportFailure {
            message: "connection refused".into(),
        });
        assert!(result.failed);
        assert_eq!(result.status_code, None);
        assert_eq!(result.transport_error.as_deref(), Some("connection refused"));
    }
}
