//! Processor - the delivery loop.
//!
//! Each cycle claims a bounded batch of due messages and dispatches them one
//! by one in schedule order. Success marks a message processed; any failure
//! records the error, bumps `retry_count` and leaves it for a later cycle.
//!
//! The claim is renewed for the rest of the batch before every dispatch and
//! on a heartbeat while a consumer runs. A row another processor took over
//! after the lease lapsed is skipped, and its outcome is not recorded here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, interval_at, sleep};
use tracing::Instrument;

use super::dispatcher::{DispatchOutcome, Dispatcher};
use crate::config::OutboxConfig;
use crate::domain::{ClaimToken, MessageId, OutboxError, OutboxMessage, RetryPolicy};
use crate::ports::{Clock, OutboxStore};

/// Result of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    /// Delivered to at least one consumer.
    pub processed: usize,
    /// Processed without any consumer registered for the tag.
    pub unhandled: usize,
    pub failed: usize,
    /// Claimed but left unattempted because shutdown was requested.
    pub released: usize,
    /// Taken over by another processor before the outcome was recorded.
    pub lost: usize,
}

impl BatchReport {
    fn is_full_and_clean(&self, batch_size: usize) -> bool {
        self.fetched >= batch_size && self.failed == 0 && self.released == 0 && self.lost == 0
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

enum Attempt {
    Delivered,
    Unhandled,
    Failed,
    Lost,
}

pub struct Processor {
    store: Arc<dyn OutboxStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    batch_size: usize,
    poll_interval: Duration,
    lease: Duration,
}

impl Processor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            retry_policy: config.retry_policy.clone(),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval,
            lease: config.lease,
        }
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Errors never end the loop; they are logged and the next cycle tries
    /// again. A full batch that went through cleanly is followed by another
    /// cycle right away to drain a backlog.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = millis(self.poll_interval),
            "outbox processor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let drain = match self.run_cycle(Some(&shutdown)).await {
                Ok(report) => {
                    if report.fetched > 0 {
                        tracing::info!(
                            fetched = report.fetched,
                            processed = report.processed,
                            unhandled = report.unhandled,
                            failed = report.failed,
                            lost = report.lost,
                            "outbox cycle finished"
                        );
                    }
                    report.is_full_and_clean(self.batch_size)
                }
                Err(err) => {
                    tracing::error!(error = %err, "outbox cycle failed");
                    false
                }
            };

            if !drain {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("outbox processor stopped");
    }

    /// Run a single cycle.
    pub async fn process_batch(&self) -> Result<BatchReport, OutboxError> {
        self.run_cycle(None).await
    }

    async fn run_cycle(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<BatchReport, OutboxError> {
        let claim = ClaimToken::new();
        let batch = self
            .store
            .fetch_due_batch(&claim, self.batch_size, self.clock.now(), self.lease)
            .await?;

        let mut report = BatchReport {
            fetched: batch.len(),
            ..BatchReport::default()
        };
        // Rows of this batch still claimed and not yet attempted.
        let mut held: Vec<MessageId> = batch.iter().map(|m| m.id).collect();

        for message in &batch {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                report.released = held.len();
                self.store.release(&claim, &held).await?;
                tracing::info!(released = held.len(), "shutdown requested, released claimed messages");
                break;
            }

            let renewed = match self
                .store
                .renew_claims(&claim, &held, self.clock.now(), self.lease)
                .await
            {
                Ok(renewed) => renewed,
                Err(err) => {
                    self.release_quietly(&claim, &held).await;
                    return Err(err);
                }
            };
            held.retain(|id| renewed.contains(id));
            if !held.contains(&message.id) {
                tracing::warn!(
                    message_id = %message.id,
                    "claim lapsed and was taken over, skipping message"
                );
                report.lost += 1;
                continue;
            }

            let attempt = match self.attempt(&claim, message, &held).await {
                Ok(attempt) => attempt,
                Err(err) => {
                    held.retain(|id| *id != message.id);
                    self.release_quietly(&claim, &held).await;
                    return Err(err);
                }
            };
            held.retain(|id| *id != message.id);
            match attempt {
                Attempt::Delivered => report.processed += 1,
                Attempt::Unhandled => report.unhandled += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::Lost => report.lost += 1,
            }
        }

        Ok(report)
    }

    async fn release_quietly(&self, claim: &ClaimToken, ids: &[MessageId]) {
        if let Err(err) = self.store.release(claim, ids).await {
            tracing::warn!(error = %err, "failed to release claimed messages");
        }
    }

    /// Dispatch one message and record the result. Only store errors escape.
    async fn attempt(
        &self,
        claim: &ClaimToken,
        message: &OutboxMessage,
        held: &[MessageId],
    ) -> Result<Attempt, OutboxError> {
        let span = tracing::info_span!(
            "outbox_dispatch",
            message_id = %message.id,
            message_type = %message.message_type,
            retry_count = message.retry_count,
        );

        self.dispatch_and_record(claim, message, held)
            .instrument(span)
            .await
    }

    /// Run the consumers while renewing the claim on `held` every third of
    /// the lease.
    async fn dispatch_with_heartbeat(
        &self,
        claim: &ClaimToken,
        message: &OutboxMessage,
        held: &[MessageId],
    ) -> Result<DispatchOutcome, OutboxError> {
        let period = (self.lease / 3).max(Duration::from_millis(10));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let dispatch = self
            .dispatcher
            .dispatch(&message.message_type, &message.content);
        tokio::pin!(dispatch);

        loop {
            tokio::select! {
                result = &mut dispatch => return result,
                _ = heartbeat.tick() => {
                    if let Err(err) = self
                        .store
                        .renew_claims(claim, held, self.clock.now(), self.lease)
                        .await
                    {
                        tracing::warn!(error = %err, "failed to renew claim during dispatch");
                    }
                }
            }
        }
    }

    async fn dispatch_and_record(
        &self,
        claim: &ClaimToken,
        message: &OutboxMessage,
        held: &[MessageId],
    ) -> Result<Attempt, OutboxError> {
        let recorded = match self.dispatch_with_heartbeat(claim, message, held).await {
            Ok(outcome) => self
                .store
                .mark_processed(claim, message.id, self.clock.now())
                .await
                .map(|()| match outcome {
                    DispatchOutcome::Delivered { consumers } => {
                        tracing::debug!(consumers, "message processed");
                        Attempt::Delivered
                    }
                    DispatchOutcome::Unhandled => {
                        tracing::debug!("message processed without consumer");
                        Attempt::Unhandled
                    }
                }),
            Err(err) => {
                let reason = err.to_string();
                let retry_count = message.retry_count.saturating_add(1);
                let next_run_at = self.retry_policy.next_run_at(retry_count, self.clock.now());
                tracing::warn!(
                    error = %reason,
                    next_retry_count = retry_count,
                    next_run_at = ?next_run_at,
                    "message dispatch failed"
                );
                self.store
                    .mark_failed(claim, message.id, &reason, next_run_at)
                    .await
                    .map(|()| Attempt::Failed)
            }
        };

        match recorded {
            Err(OutboxError::ClaimLost(_)) => {
                tracing::warn!("claim taken over during dispatch, outcome left to the new holder");
                Ok(Attempt::Lost)
            }
            other => other,
        }
    }
}
