//! Consumer traits - the side-effect owners behind the dispatcher.
//!
//! - `Consumer<T>`: typed, what cache invalidators and reindexers implement
//! - `DynConsumer`: object-safe, what the registry stores
//! - `TypedConsumer` / `FnConsumer`: the erasure adapters between the two

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::codec::PayloadCodec;
use crate::domain::{ConsumerError, MessageType, OutboxError};

/// Performs the side effect for one decoded payload.
///
/// Delivery is at-least-once: the same payload can arrive again after a crash
/// or after a sibling consumer of the same tag failed. Implementations must be
/// idempotent.
///
/// # Example
/// ```ignore
/// struct InvalidateOrderCache { cache: Arc<Cache> }
///
/// #[async_trait]
/// impl Consumer<OrderCancelled> for InvalidateOrderCache {
///     async fn consume(&self, event: OrderCancelled) -> Result<(), ConsumerError> {
///         self.cache.evict(&event.order_id).await.map_err(|e| ConsumerError::from_error(&e))
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    async fn consume(&self, payload: T) -> Result<(), ConsumerError>;
}

/// Object-safe consumer working on raw stored content.
#[async_trait]
pub trait DynConsumer: Send + Sync {
    async fn consume_dyn(&self, message_type: &MessageType, content: &str)
    -> Result<(), OutboxError>;

    /// Name used in logs and for duplicate detection.
    fn name(&self) -> &str;
}

/// Decodes content into `T` and hands it to a typed consumer.
pub struct TypedConsumer<T, C> {
    consumer: C,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> TypedConsumer<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: Consumer<T>,
{
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            name: std::any::type_name::<C>().to_string(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, C> DynConsumer for TypedConsumer<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: Consumer<T>,
{
    async fn consume_dyn(
        &self,
        message_type: &MessageType,
        content: &str,
    ) -> Result<(), OutboxError> {
        let payload: T = PayloadCodec::decode(message_type, content)?;
        self.consumer
            .consume(payload)
            .await
            .map_err(|err| OutboxError::Dispatch {
                message_type: message_type.clone(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Closure consumer over the raw content string.
pub struct FnConsumer<F, Fut> {
    name: String,
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnConsumer<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> DynConsumer for FnConsumer<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
{
    async fn consume_dyn(
        &self,
        message_type: &MessageType,
        content: &str,
    ) -> Result<(), OutboxError> {
        (self.f)(content.to_string())
            .await
            .map_err(|err| OutboxError::Dispatch {
                message_type: message_type.clone(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::testing::{FailingConsumer, RecordingConsumer, ReindexProduct};

    #[tokio::test]
    async fn typed_consumer_decodes_payload() {
        let recorder = RecordingConsumer::default();
        let seen = recorder.seen();
        let consumer = TypedConsumer::<ReindexProduct, _>::new(recorder);

        let tag = MessageType::new("catalog.product.reindex.v1");
        consumer
            .consume_dyn(&tag, r#"{"product_id":"p-1"}"#)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["p-1".to_string()]);
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_codec_error() {
        let consumer = TypedConsumer::<ReindexProduct, _>::new(RecordingConsumer::default());
        let tag = MessageType::new("catalog.product.reindex.v1");
        let err = consumer.consume_dyn(&tag, "[]").await.unwrap_err();
        assert!(matches!(err, OutboxError::Codec { .. }));
    }

    #[tokio::test]
    async fn consumer_failure_becomes_dispatch_error() {
        let consumer = TypedConsumer::<ReindexProduct, _>::new(FailingConsumer::always("down"));
        let tag = MessageType::new("catalog.product.reindex.v1");
        let err = consumer
            .consume_dyn(&tag, r#"{"product_id":"p-1"}"#)
            .await
            .unwrap_err();
        assert!(
            matches!(err, OutboxError::Dispatch { ref reason, .. } if reason == "down"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn fn_consumer_sees_raw_content() {
        let consumer = FnConsumer::new("raw", |content: String| async move {
            if content.contains("ok") {
                Ok(())
            } else {
                Err(ConsumerError::new("bad content"))
            }
        });
        let tag = MessageType::new("raw.v1");
        assert!(consumer.consume_dyn(&tag, "\"ok\"").await.is_ok());
        assert!(consumer.consume_dyn(&tag, "\"no\"").await.is_err());
        assert_eq!(consumer.name(), "raw");
    }
}
