//! ConsumerRegistry - tag → consumers.
//!
//! Built once during startup (mutable), then shared read-only behind an `Arc`
//! by the dispatcher. No locks on the hot path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::consumer::{Consumer, DynConsumer, FnConsumer, TypedConsumer};
use super::message::{DomainEvent, Message};
use crate::domain::{ConsumerError, MessageType};

/// Registry of consumers keyed by message tag.
///
/// A tag may have any number of consumers; each one is invoked for every
/// message carrying that tag.
///
/// # Example
/// ```ignore
/// let mut registry = ConsumerRegistry::new();
/// registry.register::<ReindexProduct, _>(SearchReindexer::new(client))?;
/// registry.register_event::<OrderCancelled, _>(OrderCacheInvalidator::new(cache))?;
/// ```
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<MessageType, Vec<Arc<dyn DynConsumer>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("consumer '{consumer}' is already registered for message_type '{message_type}'")]
    AlreadyRegistered {
        message_type: MessageType,
        consumer: String,
    },
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            consumers: HashMap::new(),
        }
    }

    /// Register a consumer for a plain message type.
    pub fn register<M, C>(&mut self, consumer: C) -> Result<(), RegistryError>
    where
        M: Message,
        C: Consumer<M> + 'static,
    {
        self.insert(M::message_type(), Arc::new(TypedConsumer::<M, C>::new(consumer)))
    }

    /// Register a consumer for notifications of domain event `E`.
    pub fn register_event<E, C>(&mut self, consumer: C) -> Result<(), RegistryError>
    where
        E: DomainEvent,
        C: Consumer<E> + 'static,
    {
        self.insert(
            MessageType::event(E::NAME),
            Arc::new(TypedConsumer::<E, C>::new(consumer)),
        )
    }

    /// Register a closure against a raw tag. It receives the stored content.
    pub fn register_raw<F, Fut>(
        &mut self,
        message_type: impl Into<MessageType>,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    {
        self.insert(message_type.into(), Arc::new(FnConsumer::new(name, f)))
    }

    /// Register an already erased consumer.
    pub fn register_dyn(
        &mut self,
        message_type: MessageType,
        consumer: Arc<dyn DynConsumer>,
    ) -> Result<(), RegistryError> {
        self.insert(message_type, consumer)
    }

    fn insert(
        &mut self,
        message_type: MessageType,
        consumer: Arc<dyn DynConsumer>,
    ) -> Result<(), RegistryError> {
        let slot = self.consumers.entry(message_type.clone()).or_default();
        if slot.iter().any(|existing| existing.name() == consumer.name()) {
            return Err(RegistryError::AlreadyRegistered {
                message_type,
                consumer: consumer.name().to_string(),
            });
        }
        slot.push(consumer);
        Ok(())
    }

    /// Consumers for a tag, in registration order. Empty when none is registered.
    pub fn consumers_for(&self, message_type: &MessageType) -> &[Arc<dyn DynConsumer>] {
        self.consumers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_registered(&self, message_type: &MessageType) -> bool {
        !self.consumers_for(message_type).is_empty()
    }

    pub fn registered_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.consumers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.consumers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode stored content inside a `register_raw` closure.
pub fn decode_raw<T: DeserializeOwned>(
    message_type: &MessageType,
    content: &str,
) -> Result<T, ConsumerError> {
    super::codec::PayloadCodec::decode(message_type, content)
        .map_err(|err| ConsumerError::new(err.to_string()))
}
