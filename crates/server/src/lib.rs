//! phdi-server library crate
//!
//! Exposes `build_app` and `config` for integration tests.
//! The actual binary entrypoint is in `main.rs`.

pub mod config;
mod error;
mod middleware;
mod routes;

use std::sync::{Arc, OnceLock};

use axum::{
    Extension, Router, middleware as axum_mw,
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use phdi_delivery::DeliveryContext;
use tower_http::trace::TraceLayer;

pub use middleware::request_id::REQUEST_ID_HEADER;

/// Build the full application router with all routes and middleware.
///
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a TCP port.
pub fn build_app(context: Arc<DeliveryContext>) -> Router {
    let prometheus_handle = prometheus_handle();

    Router::new()
        .route("/upload_fhir_bundle", post(routes::upload::upload_fhir_bundle))
        .route("/read_source_data", post(routes::source_data::read_source_data))
        .route("/failed_fhir_upload", post(routes::failures::failed_fhir_upload))
        .route(
            "/failed_fhir_conversion",
            post(routes::failures::failed_fhir_conversion),
        )
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .route_layer(axum_mw::from_fn(middleware::metrics_middleware))
        .layer(Extension(prometheus_handle))
        .with_state(context)
        .layer(TraceLayer::new_for_http())
        .layer(axum_mw::from_fn(middleware::request_id_middleware))
}

/// Install the global Prometheus recorder once per process.
///
/// Every router built afterwards renders the same recorder, so several apps
/// in one test binary all see the counters.
fn prometheus_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("A metrics recorder was already installed; /metrics will be empty");
            }
            handle
        })
        .clone()
}
