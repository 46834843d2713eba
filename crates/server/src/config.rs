//! Server configuration

use phdi_core::Result;
use phdi_delivery::DeliveryConfig;

/// Server configuration loaded from environment variables
pub struct Config {
    pub bind_address: String,
    /// Fixed bearer token for local runs; the metadata server is used otherwise
    pub access_token: Option<String>,
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            access_token: std::env::var("ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            delivery: DeliveryConfig::from_env()?,
        })
    }
}
