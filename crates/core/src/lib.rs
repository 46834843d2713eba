//! phdi-core: Shared types for delivering public-health data
//!
//! This crate holds everything the delivery layer needs that does not touch
//! the network: FHIR bundles and transaction-response inspection, the
//! failure taxonomy, source-message splitting, and fallback records.

pub mod bundle;
pub mod error;
pub mod fallback;
pub mod message;
pub mod outcome;

pub use bundle::{Bundle, ResponseInspection, parse_status_code};
pub use error::{DeliveryError, Failure, FailureKind, RETRYABLE_STATUSES, Result};
pub use fallback::{FallbackNamespace, FallbackRecord};
pub use message::{Message, MessageMetadata, MessageType, SourceFamily, split_messages};
pub use outcome::{FailedResource, PublishOutcome, UploadResult};
