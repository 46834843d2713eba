//! Explicitly constructed collaborators shared by every delivery operation

use std::sync::Arc;

use reqwest::Method;

use phdi_core::{DeliveryError, Result};

use crate::auth::CredentialProvider;
use crate::bus::{MessageBus, PubSubPublisher};
use crate::config::DeliveryConfig;
use crate::fallback::FallbackWriter;
use crate::publish::MessagePublisher;
use crate::storage::{GcsStorage, ObjectStorage};
use crate::transport::{HttpClient, RetryPolicy};
use crate::upload::{BundleUploader, FhirStore};

/// Everything a delivery operation talks to.
///
/// Components are built per invocation from the context, so configuration
/// problems surface on the operation that needs the missing value.
#[derive(Clone)]
pub struct DeliveryContext {
    pub config: DeliveryConfig,
    pub http: HttpClient,
    pub credentials: Arc<CredentialProvider>,
    pub storage: Arc<dyn ObjectStorage>,
    pub bus: Arc<dyn MessageBus>,
}

impl DeliveryContext {
    /// Context backed by Cloud Storage and Pub/Sub
    pub fn google_cloud(
        config: DeliveryConfig,
        http: HttpClient,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        let storage = Arc::new(GcsStorage::new(http.clone(), credentials.clone()));
        let bus = Arc::new(PubSubPublisher::new(http.clone(), credentials.clone()));
        Self {
            config,
            http,
            credentials,
            storage,
            bus,
        }
    }

    pub fn fallback_writer(&self) -> Result<FallbackWriter> {
        let bucket = self.config.require_bucket()?;
        Ok(FallbackWriter::new(self.storage.clone(), bucket))
    }

    pub fn uploader(&self) -> Result<BundleUploader> {
        let policy = RetryPolicy::new(self.config.http_retry_count, vec![Method::POST]);
        Ok(BundleUploader::new(
            self.http.clone(),
            self.credentials.clone(),
            self.fallback_writer()?,
        )
        .with_policy(policy))
    }

    pub fn publisher(&self) -> Result<MessagePublisher> {
        let topic = self.config.require_topic()?;
        Ok(
            MessagePublisher::new(self.bus.clone(), self.fallback_writer()?, topic)
                .with_retry_count(self.config.publish_retry_count),
        )
    }

    /// Resolve a FHIR store address.
    ///
    /// Explicit values win over configured ones. The project is the one the
    /// current credential belongs to.
    pub async fn fhir_store(
        &self,
        location: Option<&str>,
        dataset_id: Option<&str>,
        fhir_store_id: Option<&str>,
    ) -> Result<FhirStore> {
        let pick = |explicit: Option<&str>, configured: &Option<String>, name: &str| {
            explicit
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .or_else(|| configured.clone())
                .ok_or_else(|| DeliveryError::missing_env(name))
        };

        let location = pick(location, &self.config.fhir_store_location, "FHIR_STORE_LOCATION")?;
        let dataset_id = pick(dataset_id, &self.config.fhir_dataset_id, "FHIR_DATASET_ID")?;
        let fhir_store_id = pick(fhir_store_id, &self.config.fhir_store_id, "FHIR_STORE_ID")?;
        let project_id = self.credentials.get_identity_id().await?;

        Ok(FhirStore {
            project_id,
            location,
            dataset_id,
            fhir_store_id,
        })
    }

    pub fn store_url(&self, store: &FhirStore) -> String {
        store.url(&self.config.fhir_api_base_url)
    }
}
