//! phdi-server: delivery HTTP server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use phdi_delivery::{
    CredentialProvider, DeliveryContext, HttpClient, IdentitySource, MetadataServerIdentity,
    StaticIdentity,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phdi_server::config::Config;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Invalid configuration");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client");

    let identity: Arc<dyn IdentitySource> = match &config.access_token {
        Some(token) => {
            tracing::warn!("ACCESS_TOKEN set, using a static credential");
            let project_id = config.delivery.project_id.clone().unwrap_or_default();
            Arc::new(StaticIdentity::new(token.clone(), project_id))
        }
        None => {
            tracing::info!("Using metadata server credentials");
            Arc::new(MetadataServerIdentity::new(http.clone()))
        }
    };

    for (name, value) in [
        ("PHI_STORAGE_BUCKET", &config.delivery.phi_storage_bucket),
        ("PROJECT_ID", &config.delivery.project_id),
        ("TOPIC_ID", &config.delivery.topic_id),
    ] {
        if value.is_none() {
            tracing::warn!("{name} not set, operations that need it will fail");
        }
    }

    let context = DeliveryContext::google_cloud(
        config.delivery.clone(),
        HttpClient::new(http),
        Arc::new(CredentialProvider::new(identity)),
    );

    // Build application
    let app = phdi_server::build_app(Arc::new(context));

    // Start server
    let addr: SocketAddr = config.bind_address.parse().expect("Invalid bind address");
    tracing::info!("Starting delivery server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shutdown complete");
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
