//! Error types.

use thiserror::Error;

use super::{MessageId, MessageType};

/// Errors surfaced by stores, the codec and the dispatcher.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload codec error for message_type={message_type}: {source}")]
    Codec {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("dispatch failed for message_type={message_type}: {reason}")]
    Dispatch {
        message_type: MessageType,
        reason: String,
    },

    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("claim on message {0} is held by another processor")]
    ClaimLost(MessageId),

    #[error("duplicate message id: {0}")]
    DuplicateId(MessageId),

    #[error("corrupt outbox row: {0}")]
    CorruptRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a consumer. The message stays pending and is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConsumerError(String);

impl ConsumerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self(err.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConsumerError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for ConsumerError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}
