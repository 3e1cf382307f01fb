//! Sweeper - retention cleanup of processed messages.
//!
//! Runs on its own, coarser timer. A failed sweep is logged and tried again
//! on the next tick; it never touches the processor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::domain::OutboxError;
use crate::ports::{Clock, OutboxStore};

/// Deletes processed messages older than the retention window.
///
/// # Flow
/// 1. cutoff = now - retention
/// 2. delete rows with `processed_at < cutoff`
/// 3. sleep `interval`, repeat
pub struct Sweeper {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention,
            interval,
        }
    }

    /// Sweep immediately, then every `interval` until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            retention_days = self.retention.num_days(),
            interval_secs = self.interval.as_secs(),
            "outbox sweeper started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(err) = self.sweep_once().await {
                tracing::error!(error = %err, "outbox sweep failed");
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox sweeper stopped");
    }

    /// One sweep. Returns the number of deleted messages.
    pub async fn sweep_once(&self) -> Result<u64, OutboxError> {
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(self.retention).unwrap_or(now);
        let deleted = self.store.delete_processed_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "swept processed outbox messages");
        } else {
            tracing::debug!(%cutoff, "nothing to sweep");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClaimToken, MessageId, MessageType, OutboxMessage};
    use crate::impls::InMemoryOutboxStore;
    use crate::ports::{FixedClock, OutboxTransaction};
    use chrono::{DateTime, TimeZone, Utc};
    use ulid::Ulid;

    const LEASE: Duration = Duration::from_secs(30);

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn insert(store: &InMemoryOutboxStore, at: DateTime<Utc>) -> MessageId {
        let id = MessageId::from(Ulid::new());
        let mut tx = store.begin();
        tx.insert_message(&OutboxMessage::new(
            id,
            MessageType::new("cache.evict.v1"),
            "{}".into(),
            at,
            None,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn deliver(store: &InMemoryOutboxStore, id: MessageId, at: DateTime<Utc>) {
        let claim = ClaimToken::new();
        store.fetch_due_batch(&claim, 10, start(), LEASE).await.unwrap();
        store.mark_processed(&claim, id, at).await.unwrap();
    }

    fn sweeper(store: &InMemoryOutboxStore, clock: Arc<FixedClock>) -> Sweeper {
        Sweeper::new(
            Arc::new(store.clone()),
            clock,
            chrono::Duration::days(30),
            Duration::from_secs(3_600),
        )
    }

    #[tokio::test]
    async fn only_old_processed_messages_are_deleted() {
        let store = InMemoryOutboxStore::new();
        let clock = Arc::new(FixedClock::new(start()));

        let old_processed = insert(&store, start()).await;
        let old_pending = insert(&store, start()).await;
        let fresh_processed = insert(&store, start()).await;

        let claim = ClaimToken::new();
        store.fetch_due_batch(&claim, 10, start(), LEASE).await.unwrap();
        store.mark_processed(&claim, old_processed, start()).await.unwrap();
        store
            .mark_processed(&claim, fresh_processed, start() + chrono::Duration::days(20))
            .await
            .unwrap();
        store.mark_failed(&claim, old_pending, "boom", None).await.unwrap();

        clock.set(start() + chrono::Duration::days(31));
        let deleted = sweeper(&store, clock).sweep_once().await.unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get(old_processed).await.unwrap().is_none());
        assert!(store.get(old_pending).await.unwrap().is_some());
        assert!(store.get(fresh_processed).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cutoff_is_exclusive() {
        let store = InMemoryOutboxStore::new();
        let clock = Arc::new(FixedClock::new(start()));
        let id = insert(&store, start()).await;
        deliver(&store, id, start()).await;

        clock.set(start() + chrono::Duration::days(30));
        assert_eq!(sweeper(&store, clock.clone()).sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(sweeper(&store, clock).sweep_once().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_each_interval_until_shutdown() {
        let store = InMemoryOutboxStore::new();
        let clock = Arc::new(FixedClock::new(start()));
        let sweeper = Arc::new(sweeper(&store, clock.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let sweeper = Arc::clone(&sweeper);
            async move { sweeper.run(rx).await }
        });

        let id = insert(&store, start()).await;
        deliver(&store, id, start()).await;
        clock.set(start() + chrono::Duration::days(40));

        tokio::time::sleep(Duration::from_secs(3_601)).await;
        assert!(store.get(id).await.unwrap().is_none());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
