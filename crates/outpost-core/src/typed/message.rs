//! Message and DomainEvent traits - bind Rust payload types to stable tags.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::MessageType;

/// A payload that can be written to the outbox.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ReindexProduct {
///     product_id: String,
/// }
///
/// impl Message for ReindexProduct {
///     fn message_type() -> MessageType {
///         MessageType::new("catalog.product.reindex.v1")
///     }
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn message_type() -> MessageType;
}

/// A domain event. Stored under `Event:<NAME>` whatever wrapper carried it.
///
/// `NAME` is part of the persisted format: renaming the Rust type is fine,
/// changing `NAME` orphans every message already written.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Notification wrapper around a domain event.
///
/// Serializes as the bare event, and its tag collapses to `Event:<NAME>`, so
/// consumers registered for `E` receive notifications directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventNotification<E> {
    pub event: E,
}

impl<E: DomainEvent> EventNotification<E> {
    pub fn new(event: E) -> Self {
        Self { event }
    }

    pub fn into_event(self) -> E {
        self.event
    }
}

impl<E: DomainEvent> From<E> for EventNotification<E> {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl<E: DomainEvent> Message for EventNotification<E> {
    fn message_type() -> MessageType {
        MessageType::event(E::NAME)
    }
}
