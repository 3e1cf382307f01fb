//! Dispatcher - stored tag → consumers.

use std::any::Any;
use std::sync::Arc;

use tokio::task::JoinError;
use tracing::Instrument;

use crate::domain::{MessageType, OutboxError};
use crate::typed::{ConsumerRegistry, DynConsumer};

/// How a successful dispatch went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every consumer registered for the tag succeeded.
    Delivered { consumers: usize },
    /// No consumer is registered for the tag. Counts as success.
    Unhandled,
}

/// Routes stored content to the consumers registered for its tag.
///
/// All consumers of a tag run, in registration order, even after one of them
/// failed. The dispatch fails if any consumer failed; the message is then
/// retried as a whole and the consumers that already succeeded see it again.
///
/// Each consumer call runs on its own task, so a panic is reported as that
/// consumer's failure instead of unwinding into the caller.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConsumerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConsumerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        message_type: &MessageType,
        content: &str,
    ) -> Result<DispatchOutcome, OutboxError> {
        let consumers = self.registry.consumers_for(message_type);
        if consumers.is_empty() {
            tracing::debug!(%message_type, "no consumer registered, skipping");
            return Ok(DispatchOutcome::Unhandled);
        }

        let mut failures = Vec::new();
        for consumer in consumers {
            match run_isolated(Arc::clone(consumer), message_type, content).await {
                Ok(()) => {
                    tracing::trace!(consumer = consumer.name(), "consumer succeeded");
                }
                Err(reason) => {
                    tracing::warn!(consumer = consumer.name(), error = %reason, "consumer failed");
                    failures.push(format!("{}: {reason}", consumer.name()));
                }
            }
        }

        if failures.is_empty() {
            Ok(DispatchOutcome::Delivered {
                consumers: consumers.len(),
            })
        } else {
            Err(OutboxError::Dispatch {
                message_type: message_type.clone(),
                reason: failures.join("; "),
            })
        }
    }
}

/// Run one consumer on its own task. Errors and panics come back as a reason.
async fn run_isolated(
    consumer: Arc<dyn DynConsumer>,
    message_type: &MessageType,
    content: &str,
) -> Result<(), String> {
    let tag = message_type.clone();
    let content = content.to_owned();
    let task = tokio::spawn(
        async move { consumer.consume_dyn(&tag, &content).await }.in_current_span(),
    );

    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(OutboxError::Dispatch { reason, .. })) => Err(reason),
        Ok(Err(other)) => Err(other.to_string()),
        Err(err) => Err(join_failure(err)),
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("consumer task ended: {err}");
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_owned());
    format!("consumer panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumerError;
    use crate::typed::testing::{FailingConsumer, OrderCancelled, RecordingConsumer, ReindexProduct};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn unknown_tag_is_unhandled_success() {
        let dispatcher = Dispatcher::new(Arc::new(ConsumerRegistry::new()));
        let outcome = dispatcher
            .dispatch(&MessageType::event("SomethingNew"), "{}")
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[tokio::test]
    async fn typed_consumer_receives_decoded_payload() {
        let recorder = RecordingConsumer::default();
        let seen = recorder.seen();
        let mut registry = ConsumerRegistry::new();
        registry.register::<ReindexProduct, _>(recorder).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let outcome = dispatcher
            .dispatch(
                &MessageType::new("catalog.product.reindex.v1"),
                r#"{"product_id":"p-9"}"#,
            )
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered { consumers: 1 });
        assert_eq!(*seen.lock().unwrap(), vec!["p-9".to_string()]);
    }

    #[tokio::test]
    async fn every_consumer_runs_even_after_a_failure() {
        let failing = FailingConsumer::always("cache down");
        let calls = failing.calls();
        let recorder = RecordingConsumer::default();
        let seen = recorder.seen();

        let mut registry = ConsumerRegistry::new();
        registry.register_event::<OrderCancelled, _>(failing).unwrap();
        registry.register_event::<OrderCancelled, _>(recorder).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let err = dispatcher
            .dispatch(&MessageType::event("OrderCancelled"), r#"{"order_id":"o-1"}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, OutboxError::Dispatch { ref reason, .. } if reason.contains("cache down")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["o-1".to_string()]);
    }

    #[tokio::test]
    async fn undecodable_content_fails_dispatch() {
        let mut registry = ConsumerRegistry::new();
        registry
            .register::<ReindexProduct, _>(RecordingConsumer::default())
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher
            .dispatch(&MessageType::new("catalog.product.reindex.v1"), "not json")
            .await;
        assert!(matches!(result, Err(OutboxError::Dispatch { .. })));
    }

    #[tokio::test]
    async fn raw_consumer_sees_stored_content() {
        let mut registry = ConsumerRegistry::new();
        registry
            .register_raw("audit.v1", "audit", |content: String| async move {
                if content.contains("ok") {
                    Ok(())
                } else {
                    Err(ConsumerError::new("rejected"))
                }
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));
        let tag = MessageType::new("audit.v1");

        assert!(dispatcher.dispatch(&tag, r#""ok""#).await.is_ok());
        let err = dispatcher.dispatch(&tag, r#""no""#).await.unwrap_err();
        assert!(matches!(err, OutboxError::Dispatch { ref reason, .. } if reason == "audit: rejected"));
    }

    #[tokio::test]
    async fn panicking_consumer_becomes_a_failure() {
        let recorder = RecordingConsumer::default();
        let seen = recorder.seen();
        let mut registry = ConsumerRegistry::new();
        registry
            .register_raw("Event:OrderCancelled", "exploding", |content: String| async move {
                if content.contains("o-bad") {
                    panic!("index out of bounds in order {content}");
                }
                Ok::<(), ConsumerError>(())
            })
            .unwrap();
        registry.register_event::<OrderCancelled, _>(recorder).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let err = dispatcher
            .dispatch(&MessageType::event("OrderCancelled"), r#"{"order_id":"o-bad"}"#)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OutboxError::Dispatch { ref reason, .. }
                if reason.starts_with("exploding: consumer panicked: index out of bounds")
        ));
        // The consumer after the panicking one still ran.
        assert_eq!(*seen.lock().unwrap(), vec!["o-bad".to_string()]);

        let outcome = dispatcher
            .dispatch(&MessageType::event("OrderCancelled"), r#"{"order_id":"o-good"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { consumers: 2 });
    }
}
