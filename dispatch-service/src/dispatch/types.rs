//! Values flowing through a dispatch: the image id, the queue payload and the
//! acknowledgement handed back to the caller.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Opaque identifier of the image being dispatched.
///
/// Never empty; the HTTP layer hands in UUIDs but the coordinator does not
/// care about the shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    /// Returns `None` for empty or whitespace-only input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<uuid::Uuid> for ResourceId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Message appended to every model queue.
///
/// Field names match what the GPT/Claude/Gemini workers deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub id: String,
    pub image_base64: String,
}

impl DispatchPayload {
    /// Build the payload for `id`, base64-encoding the raw image bytes.
    pub fn new(id: &ResourceId, image: &[u8]) -> Self {
        Self {
            id: id.as_str().to_string(),
            image_base64: STANDARD.encode(image),
        }
    }

    /// Serialize once; the same bytes go to every queue.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Successful fan-out to every configured queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAck {
    pub resource_id: ResourceId,
    /// Queues reached, in publish order
    pub queues: Vec<String>,
}
