//! Source-file messages and how a source blob is split into them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DeliveryError;

/// Leading path segment of every ingestible source object
pub const SOURCE_DATA_PREFIX: &str = "source-data";

/// `origin` attribute stamped on every published message
pub const ORIGIN: &str = "read_source_data";

/// HL7v2 batch envelope segments that never belong to a message
const BATCH_ENVELOPE_SEGMENTS: [&str; 4] = ["FHS", "BHS", "BTS", "FTS"];

/// Wire format of a message payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Hl7v2,
    Ccda,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hl7v2 => "hl7v2",
            Self::Ccda => "ccda",
        }
    }
}

/// Known families of source data, keyed by the second path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFamily {
    /// Electronic lab reports
    Elr,
    /// Vaccination updates
    Vxu,
    /// Electronic case reports
    Ecr,
}

impl SourceFamily {
    /// Resolve the family from a `source-data/<family>/...` path
    pub fn from_path(path: &str) -> Result<Self, DeliveryError> {
        let mut segments = path.trim_start_matches('/').split('/');
        let (Some(SOURCE_DATA_PREFIX), Some(family)) = (segments.next(), segments.next()) else {
            return Err(DeliveryError::validation(format!(
                "Source path '{path}' is not under '{SOURCE_DATA_PREFIX}/'"
            )));
        };

        match family {
            "elr" => Ok(Self::Elr),
            "vxu" => Ok(Self::Vxu),
            "ecr" => Ok(Self::Ecr),
            other => Err(DeliveryError::validation(format!(
                "Unknown message type '{other}'. Messages should be ELR, VXU, or eCR."
            ))),
        }
    }

    pub fn message_type(self) -> MessageType {
        match self {
            Self::Elr | Self::Vxu => MessageType::Hl7v2,
            Self::Ecr => MessageType::Ccda,
        }
    }

    /// Conversion template the downstream converter starts from
    pub fn root_template(self) -> &'static str {
        match self {
            Self::Elr => "ORU_R01",
            Self::Vxu => "VXU_V04",
            Self::Ecr => "CCD",
        }
    }

    pub fn metadata(self) -> MessageMetadata {
        MessageMetadata {
            origin: ORIGIN.to_string(),
            message_type: self.message_type(),
            root_template: self.root_template().to_string(),
        }
    }
}

/// Attributes carried alongside every published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub origin: String,
    pub message_type: MessageType,
    pub root_template: String,
}

impl MessageMetadata {
    /// Message-bus attributes
    pub fn attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("origin".to_string(), self.origin.clone()),
            (
                "message_type".to_string(),
                self.message_type.as_str().to_string(),
            ),
            ("root_template".to_string(), self.root_template.clone()),
        ])
    }
}

/// One message split from a source blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Zero-based ordinal within the source blob
    pub index: usize,
    pub payload: String,
    pub metadata: MessageMetadata,
}

impl Message {
    /// `{message, message_type, root_template}` JSON published to the bus
    pub fn wire_payload(&self) -> Vec<u8> {
        json!({
            "message": self.payload,
            "message_type": self.metadata.message_type,
            "root_template": self.metadata.root_template,
        })
        .to_string()
        .into_bytes()
    }
}

/// Split a source blob into ordered messages for its family.
///
/// HL7v2 blobs may hold a batch of messages; C-CDA documents are always a
/// single message. A blank blob yields no messages.
pub fn split_messages(family: SourceFamily, blob: &str) -> Vec<Message> {
    let payloads = match family.message_type() {
        MessageType::Hl7v2 => split_hl7_batch(blob),
        MessageType::Ccda if blob.trim().is_empty() => Vec::new(),
        MessageType::Ccda => vec![blob.to_string()],
    };

    let metadata = family.metadata();
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, payload)| Message {
            index,
            payload,
            metadata: metadata.clone(),
        })
        .collect()
}

/// Split an HL7v2 batch file into individual messages.
///
/// A message starts at each `MSH` segment. Batch envelope segments are
/// dropped, and segments are re-joined with the terminator the input used.
/// Segments before the first `MSH` stay with the message that follows them,
/// and content with no `MSH` at all comes back as a single message.
pub fn split_hl7_batch(content: &str) -> Vec<String> {
    let terminator = segment_terminator(content);

    let mut messages: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_has_header = false;

    for segment in content.split(['\r', '\n']) {
        if segment.trim().is_empty() {
            continue;
        }
        if BATCH_ENVELOPE_SEGMENTS
            .iter()
            .any(|envelope| segment.starts_with(envelope))
        {
            continue;
        }
        if segment.starts_with("MSH") {
            if current_has_header {
                messages.push(std::mem::take(&mut current));
            }
            current_has_header = true;
        }
        current.push(segment);
    }
    if !current.is_empty() {
        messages.push(current);
    }

    messages
        .into_iter()
        .map(|segments| segments.join(terminator))
        .collect()
}

fn segment_terminator(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else if content.contains('\r') {
        "\r"
    } else {
        "\n"
    }
}
