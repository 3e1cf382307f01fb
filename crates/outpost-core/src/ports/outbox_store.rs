//! OutboxStore port - persistence access for outbox messages.
//!
//! The store is the only shared mutable resource of the pipeline. Processor
//! and sweeper both talk to it; writes from the domain side go through
//! [`crate::ports::OutboxTransaction`] instead so they share the caller's
//! transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ClaimToken, MessageId, OutboxError, OutboxMessage};

/// Counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    /// Unprocessed and never failed.
    pub pending: u64,
    /// Unprocessed with `retry_count > 0`.
    pub failing: u64,
    pub processed: u64,
}

impl OutboxCounts {
    pub fn unprocessed(&self) -> u64 {
        self.pending + self.failing
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` due messages (`processed_at IS NULL AND
    /// scheduled_at <= now`), ordered by `scheduled_at`, then `created_at`,
    /// then `id`.
    ///
    /// Returned messages are held by `claim` and leased until `now + lease`;
    /// concurrent fetches skip them until the lease lapses. Marking a message
    /// processed or failed ends the claim.
    async fn fetch_due_batch(
        &self,
        claim: &ClaimToken,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Push the lease on `ids` out to `now + lease` for the rows `claim`
    /// still holds. Returns those ids; rows claimed by someone else since,
    /// already processed or released are left out.
    async fn renew_claims(
        &self,
        claim: &ClaimToken,
        ids: &[MessageId],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<MessageId>, OutboxError>;

    /// Set `processed_at` and clear `error`. No-op for an already processed
    /// message; [`OutboxError::ClaimLost`] when `claim` no longer holds it.
    async fn mark_processed(
        &self,
        claim: &ClaimToken,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// Increment `retry_count`, record `error`, and move `scheduled_at` forward
    /// to `next_run_at` when given. Same ownership rules as `mark_processed`.
    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        id: MessageId,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError>;

    /// Drop the claim on messages that were fetched but not attempted.
    /// Rows held by another claim are untouched.
    async fn release(&self, claim: &ClaimToken, ids: &[MessageId]) -> Result<(), OutboxError>;

    /// Delete processed messages with `processed_at < cutoff`. Unprocessed
    /// messages are never removed, whatever their age.
    async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError>;

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, OutboxError>;

    /// Unprocessed messages with at least `min_retry_count` failures, most
    /// failed first.
    async fn failing(
        &self,
        min_retry_count: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError>;

    async fn counts(&self) -> Result<OutboxCounts, OutboxError>;
}
