//! Status - a point-in-time view of the outbox for operators.

use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, MessageType, OutboxError, OutboxMessage};
use crate::ports::{OutboxCounts, OutboxStore};
use crate::typed::ConsumerRegistry;

/// Snapshot returned by [`OutboxStatus::collect`].
///
/// Failures surface only through `retry_count` and `error`; `stuck` lists the
/// messages that failed most often so poison messages are easy to spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxStatus {
    pub counts: OutboxCounts,
    pub registered_types: Vec<MessageType>,
    pub stuck: Vec<StuckMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckMessage {
    pub id: MessageId,
    pub message_type: MessageType,
    pub retry_count: u32,
    pub error: Option<String>,
    /// `false` when nothing is registered for the tag any more.
    pub has_consumer: bool,
}

impl OutboxStatus {
    pub async fn collect(
        store: &dyn OutboxStore,
        registry: &ConsumerRegistry,
        min_retry_count: u32,
        limit: usize,
    ) -> Result<Self, OutboxError> {
        let counts = store.counts().await?;
        let stuck = store
            .failing(min_retry_count, limit)
            .await?
            .into_iter()
            .map(|message| StuckMessage::from_message(message, registry))
            .collect();
        Ok(Self {
            counts,
            registered_types: registry.registered_types(),
            stuck,
        })
    }

    pub fn is_drained(&self) -> bool {
        self.counts.unprocessed() == 0
    }
}

impl StuckMessage {
    fn from_message(message: OutboxMessage, registry: &ConsumerRegistry) -> Self {
        let has_consumer = registry.is_registered(&message.message_type);
        Self {
            id: message.id,
            message_type: message.message_type,
            retry_count: message.retry_count,
            error: message.error,
            has_consumer,
        }
    }
}
