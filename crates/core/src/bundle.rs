use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value as JsonValue, json};

use crate::error::DeliveryError;
use crate::outcome::FailedResource;

/// A FHIR Bundle exactly as it was handed to us.
///
/// Only the `resourceType` discriminator is checked. The submitted text is
/// kept as-is, so decimals such as `1.50` and integers beyond `u64` reach the
/// store and the fallback record unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Bundle(Box<RawValue>);

impl Bundle {
    /// Parse and validate a serialized Bundle
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DeliveryError> {
        let raw: Box<RawValue> = serde_json::from_slice(bytes)
            .map_err(|e| DeliveryError::validation(format!("Bundle is not valid JSON: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: Box<RawValue>) -> Result<Self, DeliveryError> {
        let object: Map<String, JsonValue> = serde_json::from_str(raw.get())
            .map_err(|_| DeliveryError::validation("Must be a FHIR bundle, got a non-object"))?;

        match object.get("resourceType").and_then(JsonValue::as_str) {
            Some("Bundle") => Ok(Self(raw)),
            Some(other) => Err(DeliveryError::validation(format!(
                "Must be a FHIR bundle, got resourceType '{other}'"
            ))),
            None => Err(DeliveryError::validation(
                "Must be a FHIR bundle: resourceType is missing",
            )),
        }
    }

    /// The JSON text as submitted
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<'de> Deserialize<'de> for Bundle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Bundle::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

/// Entry-level reading of a transaction response returned with HTTP 200.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInspection {
    /// Entries whose nested status did not start with `200`, in entry order
    pub failed_resources: Vec<FailedResource>,
    /// A `transaction-response` Bundle holding only the failing entries
    pub failing_subset: JsonValue,
}

impl ResponseInspection {
    /// Walk `entry[*].response.status` of a store response.
    ///
    /// Entries without a `response` object are skipped. The reported status is
    /// the leading three digits of the status string; a status that does not
    /// start with a number is recorded as 0.
    pub fn from_response(body: &JsonValue) -> Self {
        let entries = body
            .get("entry")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut failed_resources = Vec::new();
        let mut failing_entries = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let Some(response) = entry
                .get("response")
                .and_then(JsonValue::as_object)
                .filter(|r| !r.is_empty())
            else {
                continue;
            };

            let status = response
                .get("status")
                .and_then(JsonValue::as_str)
                .unwrap_or("");
            if status.starts_with("200") {
                continue;
            }

            failed_resources.push(FailedResource {
                index,
                status: parse_status_code(status),
            });
            failing_entries.push(entry.clone());
        }

        let failing_subset = json!({
            "resourceType": "Bundle",
            "type": "transaction-response",
            "entry": failing_entries,
        });

        Self {
            failed_resources,
            failing_subset,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_resources.is_empty()
    }
}

/// Leading 3-digit code of a FHIR `entry.response.status` string ("400 Bad Request" -> 400)
pub fn parse_status_code(status: &str) -> u16 {
    status
        .get(..3)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}
