//! In-memory outbox store with a unit of work.
//!
//! Stands in for the relational store in tests and the demo binary. It keeps a
//! tiny entity table next to the outbox so a unit of work can mutate "domain
//! state" and enqueue messages, then commit both under one lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{ClaimToken, MessageId, MessageState, OutboxError, OutboxMessage};
use crate::ports::{OutboxCounts, OutboxStore, OutboxTransaction};

/// Stored row: the public record plus the claim and its lease.
#[derive(Debug, Clone)]
struct Row {
    message: OutboxMessage,
    claimed_by: Option<ClaimToken>,
    locked_until: Option<DateTime<Utc>>,
}

impl Row {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.message.is_due(now) && self.locked_until.is_none_or(|until| until <= now)
    }

    fn is_held_by(&self, claim: &ClaimToken) -> bool {
        !self.message.is_processed() && self.claimed_by.as_ref() == Some(claim)
    }

    fn unclaim(&mut self) {
        self.claimed_by = None;
        self.locked_until = None;
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
    now.checked_add_signed(lease).unwrap_or(now)
}

#[derive(Default)]
struct InMemoryState {
    /// Outbox table (single source of truth for messages).
    messages: HashMap<MessageId, Row>,

    /// Domain table written by units of work.
    entities: HashMap<String, serde_json::Value>,
}

/// In-memory store. Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work. Nothing it stages is visible until `commit`.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            state: Arc::clone(&self.state),
            entities: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Committed value of a domain entity.
    pub async fn entity(&self, key: &str) -> Option<serde_json::Value> {
        let state = self.state.lock().await;
        state.entities.get(key).cloned()
    }

    /// Row `claim` may mark. `None` when the message is already processed.
    fn owned_row<'a>(
        state: &'a mut InMemoryState,
        claim: &ClaimToken,
        id: MessageId,
    ) -> Result<Option<&'a mut Row>, OutboxError> {
        let row = state
            .messages
            .get_mut(&id)
            .ok_or(OutboxError::NotFound(id))?;
        if row.message.is_processed() {
            return Ok(None);
        }
        if !row.is_held_by(claim) {
            return Err(OutboxError::ClaimLost(id));
        }
        Ok(Some(row))
    }

    /// Snapshot of every stored message in schedule order.
    pub async fn messages(&self) -> Vec<OutboxMessage> {
        let state = self.state.lock().await;
        let mut messages: Vec<OutboxMessage> =
            state.messages.values().map(|row| row.message.clone()).collect();
        messages.sort_by_key(|m| (m.scheduled_at, m.created_at, m.id));
        messages
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_due_batch(
        &self,
        claim: &ClaimToken,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let locked_until = lease_end(now, lease);

        let mut state = self.state.lock().await;
        let mut due: Vec<&mut Row> = state
            .messages
            .values_mut()
            .filter(|row| row.is_claimable(now))
            .collect();
        due.sort_by_key(|row| (row.message.scheduled_at, row.message.created_at, row.message.id));
        due.truncate(limit);

        Ok(due
            .into_iter()
            .map(|row| {
                row.claimed_by = Some(*claim);
                row.locked_until = Some(locked_until);
                row.message.clone()
            })
            .collect())
    }

    async fn renew_claims(
        &self,
        claim: &ClaimToken,
        ids: &[MessageId],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<MessageId>, OutboxError> {
        let locked_until = lease_end(now, lease);

        let mut state = self.state.lock().await;
        let mut renewed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = state.messages.get_mut(id).filter(|row| row.is_held_by(claim)) {
                row.locked_until = Some(locked_until);
                renewed.push(*id);
            }
        }
        Ok(renewed)
    }

    async fn mark_processed(
        &self,
        claim: &ClaimToken,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let mut state = self.state.lock().await;
        if let Some(row) = Self::owned_row(&mut state, claim, id)? {
            row.message.mark_processed(at);
            row.unclaim();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        id: MessageId,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        let mut state = self.state.lock().await;
        if let Some(row) = Self::owned_row(&mut state, claim, id)? {
            row.message.mark_failed(error.to_string(), next_run_at);
            row.unclaim();
        }
        Ok(())
    }

    async fn release(&self, claim: &ClaimToken, ids: &[MessageId]) -> Result<(), OutboxError> {
        let mut state = self.state.lock().await;
        for id in ids {
            if let Some(row) = state.messages.get_mut(id).filter(|row| row.is_held_by(claim)) {
                row.unclaim();
            }
        }
        Ok(())
    }

    async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let mut state = self.state.lock().await;
        let before = state.messages.len();
        state
            .messages
            .retain(|_, row| row.message.processed_at.is_none_or(|at| at >= cutoff));
        Ok((before - state.messages.len()) as u64)
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, OutboxError> {
        let state = self.state.lock().await;
        Ok(state.messages.get(&id).map(|row| row.message.clone()))
    }

    async fn failing(
        &self,
        min_retry_count: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let state = self.state.lock().await;
        let mut failing: Vec<OutboxMessage> = state
            .messages
            .values()
            .filter(|row| {
                !row.message.is_processed()
                    && row.message.retry_count > 0
                    && row.message.retry_count >= min_retry_count
            })
            .map(|row| row.message.clone())
            .collect();
        failing.sort_by(|a, b| {
            b.retry_count
                .cmp(&a.retry_count)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
        });
        failing.truncate(limit);
        Ok(failing)
    }

    async fn counts(&self) -> Result<OutboxCounts, OutboxError> {
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for row in state.messages.values() {
            match row.message.state() {
                MessageState::Pending => counts.pending += 1,
                MessageState::Failing => counts.failing += 1,
                MessageState::Processed => counts.processed += 1,
            }
        }
        Ok(counts)
    }
}

/// Unit of work over [`InMemoryOutboxStore`].
///
/// Dropping it without `commit` rolls everything back.
pub struct InMemoryTransaction {
    state: Arc<Mutex<InMemoryState>>,
    entities: Vec<(String, serde_json::Value)>,
    messages: Vec<OutboxMessage>,
}

impl InMemoryTransaction {
    /// Stage a domain entity write.
    pub fn put_entity(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entities.push((key.into(), value));
    }

    /// Apply staged entities and messages atomically. Fails without applying
    /// anything if a message id already exists.
    pub async fn commit(self) -> Result<(), OutboxError> {
        let mut state = self.state.lock().await;
        for message in &self.messages {
            if state.messages.contains_key(&message.id) {
                return Err(OutboxError::DuplicateId(message.id));
            }
        }
        for (key, value) in self.entities {
            state.entities.insert(key, value);
        }
        for message in self.messages {
            state.messages.insert(
                message.id,
                Row {
                    message,
                    claimed_by: None,
                    locked_until: None,
                },
            );
        }
        Ok(())
    }

    pub fn rollback(self) {}
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn insert_message(&mut self, message: &OutboxMessage) -> Result<(), OutboxError> {
        if self.messages.iter().any(|staged| staged.id == message.id) {
            return Err(OutboxError::DuplicateId(message.id));
        }
        self.messages.push(message.clone());
        Ok(())
    }
}
