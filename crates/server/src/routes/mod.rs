pub mod failures;
pub mod health;
pub mod metrics;
pub mod source_data;
pub mod upload;
