//! FHIR bundle upload handler

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use phdi_core::Bundle;
use phdi_delivery::DeliveryContext;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;

/// Body of `POST /upload_fhir_bundle`
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub dataset_id: String,
    pub location: String,
    pub fhir_store_id: String,
    /// Source object the bundle was converted from; names the fallback path
    pub source_filename: String,
    pub bundle: Bundle,
}

/// POST /upload_fhir_bundle - Upload a bundle to the addressed FHIR store
pub async fn upload_fhir_bundle(
    State(context): State<Arc<DeliveryContext>>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;

    let uploader = context.uploader()?;
    let store = context
        .fhir_store(
            Some(&request.location),
            Some(&request.dataset_id),
            Some(&request.fhir_store_id),
        )
        .await?;

    let result = uploader
        .upload(&request.bundle, &context.store_url(&store), &request.source_filename)
        .await?;

    match result.error() {
        Some(error) => {
            let detail = serde_json::to_value(&result).unwrap_or_default();
            Err(AppError::from(error).with_detail(detail))
        }
        None => Ok(Json(json!({
            "status": "success",
            "result": result,
        }))),
    }
}
