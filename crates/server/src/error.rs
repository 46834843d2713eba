//! Application error handling

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use phdi_core::{DeliveryError, FailureKind};
use serde_json::{Value as JsonValue, json};

/// A delivery failure rendered as `{status: "failure", kind, message}`
#[derive(Debug)]
pub struct AppError {
    error: DeliveryError,
    detail: Option<JsonValue>,
}

impl AppError {
    /// Attach a JSON body describing what happened before the failure
    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }

    fn status(&self) -> StatusCode {
        match self.error.kind() {
            FailureKind::Validation | FailureKind::PartialBundleFailure => StatusCode::BAD_REQUEST,
            FailureKind::Config | FailureKind::Auth | FailureKind::Storage => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FailureKind::Transport | FailureKind::Http | FailureKind::Publish => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let failure = self.error.to_failure();

        if status.is_server_error() {
            tracing::error!(kind = %failure.kind, message = %failure.message, "Request failed");
        } else {
            tracing::warn!(kind = %failure.kind, message = %failure.message, "Request rejected");
        }

        let mut body = json!({
            "status": "failure",
            "kind": failure.kind,
            "message": failure.message,
        });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }

        (status, Json(body)).into_response()
    }
}

impl From<DeliveryError> for AppError {
    fn from(error: DeliveryError) -> Self {
        Self {
            error,
            detail: None,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        DeliveryError::validation(rejection.body_text()).into()
    }
}
