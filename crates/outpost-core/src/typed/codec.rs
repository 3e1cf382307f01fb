//! PayloadCodec - converts payloads to and from the stored `content` text.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{MessageType, OutboxError};

/// JSON codec for message content.
///
/// Stores treat `content` as opaque text; only this codec and the consumers
/// behind the dispatcher interpret it.
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize + ?Sized>(
        message_type: &MessageType,
        payload: &T,
    ) -> Result<String, OutboxError> {
        serde_json::to_string(payload).map_err(|source| OutboxError::Codec {
            message_type: message_type.clone(),
            source,
        })
    }

    pub fn decode<T: DeserializeOwned>(
        message_type: &MessageType,
        content: &str,
    ) -> Result<T, OutboxError> {
        serde_json::from_str(content).map_err(|source| OutboxError::Codec {
            message_type: message_type.clone(),
            source,
        })
    }
}
