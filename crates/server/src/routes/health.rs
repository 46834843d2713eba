//! Health check endpoint

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::sync::Arc;

use phdi_delivery::DeliveryContext;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    /// Required settings the environment does not provide
    #[serde(skip_serializing_if = "Vec::is_empty")]
    missing: Vec<&'static str>,
}

/// GET /health - Report liveness and which delivery settings are absent
pub async fn check(State(context): State<Arc<DeliveryContext>>) -> impl IntoResponse {
    let config = &context.config;
    let missing: Vec<&'static str> = [
        ("PHI_STORAGE_BUCKET", config.phi_storage_bucket.is_none()),
        ("PROJECT_ID", config.project_id.is_none()),
        ("TOPIC_ID", config.topic_id.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let status = if missing.is_empty() { "healthy" } else { "degraded" };
    Json(HealthResponse { status, missing })
}
