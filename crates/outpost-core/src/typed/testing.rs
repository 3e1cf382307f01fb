//! Payload and consumer fixtures shared by unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Consumer, DomainEvent, Message};
use crate::domain::{ConsumerError, MessageType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexProduct {
    pub product_id: String,
}

impl Message for ReindexProduct {
    fn message_type() -> MessageType {
        MessageType::new("catalog.product.reindex.v1")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: String,
}

impl DomainEvent for OrderCancelled {
    const NAME: &'static str = "OrderCancelled";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub payment_id: String,
}

impl DomainEvent for PaymentRefunded {
    const NAME: &'static str = "PaymentRefunded";
}

/// Records the id carried by every payload it sees.
#[derive(Default, Clone)]
pub struct RecordingConsumer {
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingConsumer {
    pub fn seen(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.seen)
    }

    fn record(&self, id: String) {
        self.seen.lock().unwrap().push(id);
    }
}

#[async_trait]
impl Consumer<ReindexProduct> for RecordingConsumer {
    async fn consume(&self, payload: ReindexProduct) -> Result<(), ConsumerError> {
        self.record(payload.product_id);
        Ok(())
    }
}

#[async_trait]
impl Consumer<OrderCancelled> for RecordingConsumer {
    async fn consume(&self, payload: OrderCancelled) -> Result<(), ConsumerError> {
        self.record(payload.order_id);
        Ok(())
    }
}

#[async_trait]
impl Consumer<PaymentRefunded> for RecordingConsumer {
    async fn consume(&self, payload: PaymentRefunded) -> Result<(), ConsumerError> {
        self.record(payload.payment_id);
        Ok(())
    }
}

/// Fails a fixed number of times (or forever), then succeeds.
pub struct FailingConsumer {
    reason: String,
    remaining: Option<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl FailingConsumer {
    pub fn always(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            remaining: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn times(n: u32, reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            remaining: Some(AtomicU32::new(n)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl<T> Consumer<T> for FailingConsumer
where
    T: DeserializeOwned + Send + 'static,
{
    async fn consume(&self, _payload: T) -> Result<(), ConsumerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(remaining) = &self.remaining else {
            return Err(ConsumerError::new(self.reason.clone()));
        };
        let left = remaining.load(Ordering::SeqCst);
        if left > 0 {
            remaining.store(left - 1, Ordering::SeqCst);
            return Err(ConsumerError::new(self.reason.clone()));
        }
        Ok(())
    }
}
