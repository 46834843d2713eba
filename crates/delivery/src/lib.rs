//! phdi-delivery: Resilient delivery of FHIR bundles and source messages
//!
//! Gets healthcare data to a FHIR store or a message bus under flaky
//! networks, expiring credentials and partial rejection, and writes anything
//! that cannot be delivered to fallback storage.

pub mod auth;
pub mod bus;
pub mod config;
pub mod context;
pub mod fallback;
pub mod publish;
pub mod storage;
pub mod transport;
pub mod upload;

pub use auth::{
    AccessToken, CredentialProvider, CredentialState, IdentitySource, IssuedCredential,
    MetadataServerIdentity, StaticIdentity,
};
pub use bus::{MessageBus, PubSubPublisher, TopicPath};
pub use config::DeliveryConfig;
pub use context::DeliveryContext;
pub use fallback::FallbackWriter;
pub use publish::MessagePublisher;
pub use storage::{GcsStorage, ObjectStorage};
pub use transport::{HttpClient, HttpRequest, HttpResponse, Outcome, RetryPolicy};
pub use upload::{BundleUploader, FhirStore};
