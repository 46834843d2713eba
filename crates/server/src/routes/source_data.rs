//! Source-file ingestion handler

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use phdi_core::{DeliveryError, PublishOutcome};
use phdi_delivery::DeliveryContext;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;

/// Storage notification for a newly written source object
#[derive(Debug, Deserialize)]
pub struct StorageEvent {
    /// Object path inside the bucket
    pub name: String,
    pub bucket: String,
}

/// POST /read_source_data - Split a source object and publish its messages
pub async fn read_source_data(
    State(context): State<Arc<DeliveryContext>>,
    payload: Result<Json<StorageEvent>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(event) = payload?;

    let publisher = context.publisher()?;
    let outcomes = publisher.publish_object(&event.bucket, &event.name).await?;

    let published = outcomes.iter().filter(|o| o.is_published()).count();
    let undeliverable = outcomes
        .iter()
        .filter(|o| matches!(o, PublishOutcome::Undeliverable { .. }))
        .count();

    if undeliverable > 0 {
        let error = DeliveryError::storage(format!(
            "{undeliverable} of {} messages from {} could be neither published nor written to fallback storage",
            outcomes.len(),
            event.name
        ));
        return Err(AppError::from(error).with_detail(json!({ "outcomes": outcomes })));
    }

    tracing::info!(
        source = %event.name,
        published,
        dead_lettered = outcomes.len() - published,
        "Source file processed"
    );

    Ok(Json(json!({
        "status": "success",
        "published": published,
        "outcomes": outcomes,
    })))
}
