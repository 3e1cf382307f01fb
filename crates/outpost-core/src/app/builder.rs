//! OutboxBuilder - wiring and startup validation.
//!
//! Consumers are registered up front; `build()` freezes the registry and
//! checks that every tag the application expects to consume has a consumer.

use std::future::Future;
use std::sync::Arc;

use super::dispatcher::Dispatcher;
use super::processor::Processor;
use super::service::OutboxService;
use super::status::OutboxStatus;
use super::sweeper::Sweeper;
use super::writer::OutboxWriter;
use crate::config::OutboxConfig;
use crate::domain::{ConsumerError, MessageType, OutboxError};
use crate::ports::{Clock, IdGenerator, OutboxStore, SystemClock, UlidGenerator};
use crate::typed::{Consumer, ConsumerRegistry, DomainEvent, Message, RegistryError};

/// Builds an [`Outbox`].
///
/// # Example
/// ```ignore
/// let outbox = OutboxBuilder::new(Arc::new(store))
///     .config(OutboxConfig::from_env()?)
///     .register::<ReindexProduct, _>(SearchReindexer::new(client))?
///     .register_event::<OrderCancelled, _>(OrderCacheInvalidator::new(cache))?
///     .expect_types(&["catalog.product.reindex.v1", "Event:OrderCancelled"])
///     .build()?;
/// let service = outbox.start();
/// ```
///
/// # Fail-fast
/// An unknown tag is delivered as a no-op at runtime, so a forgotten
/// registration would silently drop messages. `expect_types()` turns that into
/// a startup error.
pub struct OutboxBuilder {
    store: Arc<dyn OutboxStore>,
    registry: ConsumerRegistry,
    config: OutboxConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    expected_types: Option<Vec<MessageType>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing message types: {0:?}. These types were expected but have no consumer.")]
    MissingMessageTypes(Vec<MessageType>),
}

impl OutboxBuilder {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self {
            store,
            registry: ConsumerRegistry::new(),
            config: OutboxConfig::default(),
            clock: Arc::new(SystemClock),
            ids: None,
            expected_types: None,
        }
    }

    pub fn config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a [`UlidGenerator`] on the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn register<M, C>(mut self, consumer: C) -> Result<Self, RegistryError>
    where
        M: Message,
        C: Consumer<M> + 'static,
    {
        self.registry.register::<M, C>(consumer)?;
        Ok(self)
    }

    pub fn register_event<E, C>(mut self, consumer: C) -> Result<Self, RegistryError>
    where
        E: DomainEvent,
        C: Consumer<E> + 'static,
    {
        self.registry.register_event::<E, C>(consumer)?;
        Ok(self)
    }

    pub fn register_raw<F, Fut>(
        mut self,
        message_type: impl Into<MessageType>,
        name: impl Into<String>,
        f: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    {
        self.registry.register_raw(message_type, name, f)?;
        Ok(self)
    }

    /// Tags that must have a consumer when `build()` runs.
    pub fn expect_types(mut self, message_types: &[&str]) -> Self {
        self.expected_types = Some(message_types.iter().map(|&t| MessageType::new(t)).collect());
        self
    }

    pub fn build(self) -> Result<Outbox, BuildError> {
        if let Some(expected_types) = &self.expected_types {
            let missing: Vec<MessageType> = expected_types
                .iter()
                .filter(|t| !self.registry.is_registered(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingMessageTypes(missing));
            }
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let registry = Arc::new(self.registry);
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let processor = Processor::new(
            Arc::clone(&self.store),
            dispatcher.clone(),
            Arc::clone(&self.clock),
            &self.config,
        );
        let sweeper = Sweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.retention(),
            self.config.sweep_interval,
        );

        tracing::debug!(
            registered_types = ?registry.registered_types(),
            consumers = registry.len(),
            "outbox built"
        );

        Ok(Outbox {
            store: self.store,
            writer: OutboxWriter::new(self.clock, ids),
            dispatcher,
            processor: Arc::new(processor),
            sweeper: Arc::new(sweeper),
            config: self.config,
        })
    }
}

/// A wired outbox: writer for the enqueue side, processor and sweeper for the
/// delivery side.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    writer: OutboxWriter,
    dispatcher: Dispatcher,
    processor: Arc<Processor>,
    sweeper: Arc<Sweeper>,
    config: OutboxConfig,
}

impl Outbox {
    pub fn writer(&self) -> &OutboxWriter {
        &self.writer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub async fn status(
        &self,
        min_retry_count: u32,
        limit: usize,
    ) -> Result<OutboxStatus, OutboxError> {
        OutboxStatus::collect(
            self.store.as_ref(),
            self.dispatcher.registry(),
            min_retry_count,
            limit,
        )
        .await
    }

    /// Spawn the processor and sweeper loops.
    pub fn start(&self) -> OutboxService {
        OutboxService::spawn(Arc::clone(&self.processor), Arc::clone(&self.sweeper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryOutboxStore;
    use crate::typed::testing::{OrderCancelled, PaymentRefunded, RecordingConsumer, ReindexProduct};

    fn store() -> Arc<dyn OutboxStore> {
        Arc::new(InMemoryOutboxStore::new())
    }

    #[test]
    fn build_success() {
        let outbox = OutboxBuilder::new(store())
            .register::<ReindexProduct, _>(RecordingConsumer::default())
            .unwrap()
            .register_event::<OrderCancelled, _>(RecordingConsumer::default())
            .unwrap()
            .expect_types(&["catalog.product.reindex.v1", "Event:OrderCancelled"])
            .build();
        let outbox = outbox.unwrap();
        assert_eq!(outbox.dispatcher().registry().len(), 2);
    }

    #[test]
    fn build_missing_message_types() {
        let outbox = OutboxBuilder::new(store())
            .register_event::<OrderCancelled, _>(RecordingConsumer::default())
            .unwrap()
            .expect_types(&["Event:OrderCancelled", "Event:PaymentRefunded"])
            .build();
        assert!(matches!(
            outbox,
            Err(BuildError::MissingMessageTypes(missing))
                if missing == vec![MessageType::event(PaymentRefunded::NAME)]
        ));
    }

    #[test]
    fn build_without_expectations() {
        assert!(OutboxBuilder::new(store()).build().is_ok());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = OutboxBuilder::new(store())
            .register_event::<OrderCancelled, _>(RecordingConsumer::default())
            .unwrap()
            .register_event::<OrderCancelled, _>(RecordingConsumer::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn built_outbox_delivers_enqueued_messages() {
        let store = InMemoryOutboxStore::new();
        let recorder = RecordingConsumer::default();
        let seen = recorder.seen();
        let outbox = OutboxBuilder::new(Arc::new(store.clone()))
            .register_event::<OrderCancelled, _>(recorder)
            .unwrap()
            .build()
            .unwrap();

        let mut tx = store.begin();
        outbox
            .writer()
            .enqueue_event(
                &mut tx,
                &OrderCancelled {
                    order_id: "o-7".into(),
                },
                None,
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let report = outbox.processor().process_batch().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["o-7".to_string()]);
        let status = outbox.status(1, 10).await.unwrap();
        assert!(status.is_drained());
        assert_eq!(
            status.registered_types,
            vec![MessageType::event(OrderCancelled::NAME)]
        );
    }
}
