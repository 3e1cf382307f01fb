//! OutboxTransaction port - the write seam shared with domain mutations.
//!
//! Implemented by whatever transaction type the domain write path already
//! holds (`sqlx::Transaction<'_, Postgres>`, the in-memory unit of work).
//! Messages inserted here become visible exactly when the transaction commits
//! and vanish with it on rollback.

use async_trait::async_trait;

use crate::domain::{OutboxError, OutboxMessage};

#[async_trait]
pub trait OutboxTransaction: Send {
    async fn insert_message(&mut self, message: &OutboxMessage) -> Result<(), OutboxError>;
}
