//! PostgreSQL outbox store.
//!
//! Schema lives in `migrations/`. Domain write paths enqueue through their own
//! `sqlx::Transaction<'_, Postgres>`, which implements [`OutboxTransaction`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, Pool, Postgres, Row, Transaction};

use crate::domain::{ClaimToken, MessageId, MessageType, OutboxError, OutboxMessage};
use crate::ports::{OutboxCounts, OutboxStore, OutboxTransaction};

pub type PgPool = Pool<Postgres>;

const COLUMNS: &str =
    "id, message_type, content, created_at, scheduled_at, processed_at, error, retry_count";

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, OutboxError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), OutboxError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction for a domain write that will enqueue messages.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, OutboxError> {
        Ok(self.pool.begin().await?)
    }

    /// Why a conditional mark touched no row: already processed (no-op),
    /// held by another claim, or missing.
    async fn unmatched_mark(&self, id: MessageId) -> Result<(), OutboxError> {
        let processed = sqlx::query_scalar::<_, bool>(
            r#"SELECT processed_at IS NOT NULL FROM outbox_messages WHERE id = $1"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match processed {
            None => Err(OutboxError::NotFound(id)),
            Some(true) => Ok(()),
            Some(false) => Err(OutboxError::ClaimLost(id)),
        }
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
    now.checked_add_signed(lease).unwrap_or(now)
}

fn id_strings(ids: &[MessageId]) -> Vec<String> {
    ids.iter().map(MessageId::to_string).collect()
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn fetch_due_batch(
        &self,
        claim: &ClaimToken,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let locked_until = lease_end(now, lease);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // Claim and read in one statement; SKIP LOCKED keeps concurrent
        // processors off each other's rows.
        let query = format!(
            r#"
            UPDATE outbox_messages
            SET locked_until = $2,
                claimed_by = $4
            WHERE id IN (
                SELECT id
                FROM outbox_messages
                WHERE processed_at IS NULL
                  AND scheduled_at <= $1
                  AND (locked_until IS NULL OR locked_until <= $1)
                ORDER BY scheduled_at, created_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );
        let rows = sqlx::query_as::<_, OutboxMessageRecord>(&query)
            .bind(now)
            .bind(locked_until)
            .bind(limit)
            .bind(claim.to_string())
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order.
        let mut messages = rows
            .into_iter()
            .map(OutboxMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by_key(|m| (m.scheduled_at, m.created_at, m.id));
        Ok(messages)
    }

    async fn renew_claims(
        &self,
        claim: &ClaimToken,
        ids: &[MessageId],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<MessageId>, OutboxError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let renewed = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE outbox_messages
            SET locked_until = $3
            WHERE id = ANY($1)
              AND claimed_by = $2
              AND processed_at IS NULL
            RETURNING id
            "#,
        )
        .bind(id_strings(ids))
        .bind(claim.to_string())
        .bind(lease_end(now, lease))
        .fetch_all(&self.pool)
        .await?;

        renewed
            .iter()
            .map(|id| {
                id.parse::<MessageId>()
                    .map_err(|err| OutboxError::CorruptRow(format!("id '{id}': {err}")))
            })
            .collect()
    }

    async fn mark_processed(
        &self,
        claim: &ClaimToken,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET processed_at = $2,
                error = NULL,
                locked_until = NULL,
                claimed_by = NULL
            WHERE id = $1
              AND processed_at IS NULL
              AND claimed_by = $3
            "#,
        )
        .bind(id.to_string())
        .bind(at)
        .bind(claim.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.unmatched_mark(id).await;
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
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                error = $2,
                scheduled_at = GREATEST(scheduled_at, COALESCE($3, scheduled_at)),
                locked_until = NULL,
                claimed_by = NULL
            WHERE id = $1
              AND processed_at IS NULL
              AND claimed_by = $4
            "#,
        )
        .bind(id.to_string())
        .bind(error)
        .bind(next_run_at)
        .bind(claim.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.unmatched_mark(id).await;
        }
        Ok(())
    }

    async fn release(&self, claim: &ClaimToken, ids: &[MessageId]) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET locked_until = NULL,
                claimed_by = NULL
            WHERE id = ANY($1)
              AND claimed_by = $2
            "#,
        )
        .bind(id_strings(ids))
        .bind(claim.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE processed_at IS NOT NULL
              AND processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, OutboxError> {
        let query = format!("SELECT {COLUMNS} FROM outbox_messages WHERE id = $1");
        let record = sqlx::query_as::<_, OutboxMessageRecord>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        record.map(OutboxMessage::try_from).transpose()
    }

    async fn failing(
        &self,
        min_retry_count: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let query = format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_messages
            WHERE processed_at IS NULL
              AND retry_count > 0
              AND retry_count >= $1
            ORDER BY retry_count DESC, scheduled_at
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, OutboxMessageRecord>(&query)
            .bind(i32::try_from(min_retry_count).unwrap_or(i32::MAX))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutboxMessage::try_from).collect()
    }

    async fn counts(&self) -> Result<OutboxCounts, OutboxError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count = 0) AS pending,
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count > 0) AS failing,
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL) AS processed
            FROM outbox_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<u64, OutboxError> {
            let value: i64 = row.try_get(column)?;
            Ok(u64::try_from(value).unwrap_or_default())
        };
        Ok(OutboxCounts {
            pending: count("pending")?,
            failing: count("failing")?,
            processed: count("processed")?,
        })
    }
}

#[async_trait]
impl<'c> OutboxTransaction for Transaction<'c, Postgres> {
    async fn insert_message(&mut self, message: &OutboxMessage) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, message_type, content, created_at, scheduled_at,
                processed_at, error, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.scheduled_at)
        .bind(message.processed_at)
        .bind(&message.error)
        .bind(i32::try_from(message.retry_count).unwrap_or(i32::MAX))
        .execute(&mut **self)
        .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct OutboxMessageRecord {
    id: String,
    message_type: String,
    content: String,
    created_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: i32,
}

impl TryFrom<OutboxMessageRecord> for OutboxMessage {
    type Error = OutboxError;

    fn try_from(record: OutboxMessageRecord) -> Result<Self, Self::Error> {
        let id = record
            .id
            .parse::<MessageId>()
            .map_err(|err| OutboxError::CorruptRow(format!("id '{}': {err}", record.id)))?;
        let retry_count = u32::try_from(record.retry_count).map_err(|_| {
            OutboxError::CorruptRow(format!(
                "retry_count {} for message {id}",
                record.retry_count
            ))
        })?;
        Ok(OutboxMessage {
            id,
            message_type: MessageType::new(record.message_type),
            content: record.content,
            created_at: record.created_at,
            scheduled_at: record.scheduled_at,
            processed_at: record.processed_at,
            error: record.error,
            retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record(id: String, retry_count: i32) -> OutboxMessageRecord {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        OutboxMessageRecord {
            id,
            message_type: "Event:OrderCancelled".into(),
            content: r#"{"order_id":"o-1"}"#.into(),
            created_at: created,
            scheduled_at: created,
            processed_at: None,
            error: Some("timeout".into()),
            retry_count,
        }
    }

    #[test]
    fn record_converts_to_message() {
        let ulid = Ulid::new();
        let message = OutboxMessage::try_from(record(ulid.to_string(), 2)).unwrap();
        assert_eq!(message.id.as_ulid(), ulid);
        assert_eq!(message.message_type.event_name(), Some("OrderCancelled"));
        assert_eq!(message.retry_count, 2);
        assert_eq!(message.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn bad_id_is_a_corrupt_row() {
        let err = OutboxMessage::try_from(record("nope".into(), 0)).unwrap_err();
        assert!(matches!(err, OutboxError::CorruptRow(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn negative_retry_count_is_a_corrupt_row() {
        let err = OutboxMessage::try_from(record(Ulid::new().to_string(), -1)).unwrap_err();
        assert!(matches!(err, OutboxError::CorruptRow(_)));
    }
}
