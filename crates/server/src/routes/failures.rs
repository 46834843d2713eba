//! Handlers recording failures reported by upstream pipeline steps

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use phdi_core::Bundle;
use phdi_delivery::DeliveryContext;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct FailedUploadRequest {
    pub failure_reason: String,
    pub source_filename: String,
    pub bundle: Bundle,
}

#[derive(Debug, Deserialize)]
pub struct FailedConversionRequest {
    /// Whatever the converter answered, kept verbatim
    pub fhir_converter_response: JsonValue,
    pub source_filename: String,
}

/// POST /failed_fhir_upload - Persist a bundle that could not be uploaded
pub async fn failed_fhir_upload(
    State(context): State<Arc<DeliveryContext>>,
    payload: Result<Json<FailedUploadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;

    let path = context
        .fallback_writer()?
        .record_upload_failure(
            &request.source_filename,
            &request.bundle,
            &request.failure_reason,
        )
        .await?;

    Ok(Json(json!({ "status": "success", "path": path })))
}

/// POST /failed_fhir_conversion - Persist a converter rejection
pub async fn failed_fhir_conversion(
    State(context): State<Arc<DeliveryContext>>,
    payload: Result<Json<FailedConversionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;

    let path = context
        .fallback_writer()?
        .record_conversion_failure(&request.source_filename, request.fhir_converter_response)
        .await?;

    Ok(Json(json!({ "status": "success", "path": path })))
}
