//! Delivery configuration loaded from environment variables

use phdi_core::{DeliveryError, Result};

use crate::bus::TopicPath;
use crate::upload::HEALTHCARE_BASE_URL;

/// Environment-provided settings.
///
/// Values an operation needs but the environment lacks are only reported when
/// that operation runs, through the `require_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub phi_storage_bucket: Option<String>,
    pub project_id: Option<String>,
    pub topic_id: Option<String>,
    pub fhir_store_location: Option<String>,
    pub fhir_dataset_id: Option<String>,
    pub fhir_store_id: Option<String>,
    pub fhir_api_base_url: String,
    pub http_retry_count: u32,
    pub publish_retry_count: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            phi_storage_bucket: None,
            project_id: None,
            topic_id: None,
            fhir_store_location: None,
            fhir_dataset_id: None,
            fhir_store_id: None,
            fhir_api_base_url: HEALTHCARE_BASE_URL.to_string(),
            http_retry_count: 3,
            publish_retry_count: 1,
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            phi_storage_bucket: get("PHI_STORAGE_BUCKET"),
            project_id: get("PROJECT_ID"),
            topic_id: get("TOPIC_ID"),
            fhir_store_location: get("FHIR_STORE_LOCATION"),
            fhir_dataset_id: get("FHIR_DATASET_ID"),
            fhir_store_id: get("FHIR_STORE_ID"),
            fhir_api_base_url: get("FHIR_API_BASE_URL").unwrap_or(defaults.fhir_api_base_url),
            http_retry_count: parse_count("HTTP_RETRY_COUNT", get("HTTP_RETRY_COUNT"))?
                .unwrap_or(defaults.http_retry_count),
            publish_retry_count: parse_count("PUBLISH_RETRY_COUNT", get("PUBLISH_RETRY_COUNT"))?
                .unwrap_or(defaults.publish_retry_count),
        })
    }

    pub fn require_bucket(&self) -> Result<&str> {
        require("PHI_STORAGE_BUCKET", &self.phi_storage_bucket)
    }

    pub fn require_project_id(&self) -> Result<&str> {
        require("PROJECT_ID", &self.project_id)
    }

    pub fn require_topic(&self) -> Result<TopicPath> {
        let topic_id = require("TOPIC_ID", &self.topic_id)?;
        let project_id = self.require_project_id()?;
        Ok(TopicPath::new(project_id, topic_id))
    }
}

fn require<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| DeliveryError::missing_env(name))
}

fn parse_count(name: &str, value: Option<String>) -> Result<Option<u32>> {
    value
        .map(|raw| {
            raw.trim().parse().map_err(|_| {
                DeliveryError::config(format!(
                    "Environment variable '{name}' must be a non-negative integer, got '{raw}'"
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<DeliveryConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DeliveryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.http_retry_count, 3);
        assert_eq!(config.publish_retry_count, 1);
        assert_eq!(config.fhir_api_base_url, "https://healthcare.googleapis.com/v1");
    }

    #[test]
    fn missing_values_are_reported_by_name_on_use() {
        let config = config_from(&[("PROJECT_ID", "phdi"), ("PHI_STORAGE_BUCKET", " ")]).unwrap();

        let err = config.require_bucket().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Environment variable 'PHI_STORAGE_BUCKET' not set. The environment variable must be set."
        );
        assert!(matches!(
            config.require_topic().unwrap_err(),
            DeliveryError::Config { message } if message.contains("TOPIC_ID")
        ));
    }

    #[test]
    fn topic_combines_project_and_topic() {
        let config = config_from(&[("PROJECT_ID", "phdi"), ("TOPIC_ID", "ingest")]).unwrap();
        assert_eq!(
            config.require_topic().unwrap().to_string(),
            "projects/phdi/topics/ingest"
        );
    }

    #[test]
    fn malformed_counts_are_rejected_at_load() {
        let err = config_from(&[("HTTP_RETRY_COUNT", "three")]).unwrap_err();
        assert!(matches!(err, DeliveryError::Config { .. }));
        assert_eq!(
            config_from(&[("PUBLISH_RETRY_COUNT", "2")]).unwrap().publish_retry_count,
            2
        );
    }
}
