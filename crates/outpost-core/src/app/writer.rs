//! OutboxWriter - the enqueue side.
//!
//! Every enqueue goes through a transaction the caller already holds, so the
//! message commits or rolls back together with the domain change that caused
//! it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{MessageId, MessageType, OutboxError, OutboxMessage};
use crate::ports::{Clock, IdGenerator, OutboxTransaction};
use crate::typed::{DomainEvent, Message, PayloadCodec};

/// Builds message records and inserts them through an open transaction.
///
/// # Example
/// ```ignore
/// let mut tx = store.begin().await?;
/// orders::cancel(&mut tx, order_id).await?;
/// writer.enqueue_event(&mut tx, &OrderCancelled { order_id }, None).await?;
/// tx.commit().await?;
/// ```
#[derive(Clone)]
pub struct OutboxWriter {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl OutboxWriter {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    /// Enqueue a typed message under `M::message_type()`.
    ///
    /// `scheduled_at` defers delivery; `None` means due immediately.
    pub async fn enqueue<M, T>(
        &self,
        tx: &mut T,
        message: &M,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, OutboxError>
    where
        M: Message,
        T: OutboxTransaction + ?Sized,
    {
        self.enqueue_raw(tx, M::message_type(), message, scheduled_at)
            .await
    }

    /// Enqueue a notification for domain event `E`, stored as `Event:<NAME>`.
    pub async fn enqueue_event<E, T>(
        &self,
        tx: &mut T,
        event: &E,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, OutboxError>
    where
        E: DomainEvent,
        T: OutboxTransaction + ?Sized,
    {
        self.enqueue_raw(tx, MessageType::event(E::NAME), event, scheduled_at)
            .await
    }

    /// Enqueue any serializable payload under an explicit tag.
    pub async fn enqueue_raw<P, T>(
        &self,
        tx: &mut T,
        message_type: MessageType,
        payload: &P,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, OutboxError>
    where
        P: Serialize + Sync + ?Sized,
        T: OutboxTransaction + ?Sized,
    {
        let content = PayloadCodec::encode(&message_type, payload)?;
        let id = self.ids.generate_message_id();
        let message = OutboxMessage::new(id, message_type, content, self.clock.now(), scheduled_at);

        tx.insert_message(&message).await?;

        tracing::debug!(
            message_id = %message.id,
            message_type = %message.message_type,
            scheduled_at = %message.scheduled_at,
            "message enqueued"
        );
        Ok(id)
    }
}
