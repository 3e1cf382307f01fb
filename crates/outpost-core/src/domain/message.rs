//! Outbox message record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, MessageState, MessageType};

/// One durable row per pending side effect.
///
/// Design:
/// - `processed_at` is the terminal-success marker and is set at most once.
/// - `retry_count` only grows; it is the evidence for backoff and for
///   spotting poison messages.
/// - `scheduled_at` never precedes `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub message_type: MessageType,

    /// Serialized payload. Opaque to stores.
    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Earliest time the message may be dispatched.
    pub scheduled_at: DateTime<Utc>,

    pub processed_at: Option<DateTime<Utc>>,

    /// Last failure description.
    pub error: Option<String>,

    pub retry_count: u32,
}

impl OutboxMessage {
    /// Build a fresh pending message. A `scheduled_at` earlier than
    /// `created_at` is clamped to `created_at`.
    pub fn new(
        id: MessageId,
        message_type: MessageType,
        content: String,
        created_at: DateTime<Utc>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Self {
        let scheduled_at = scheduled_at.map_or(created_at, |at| at.max(created_at));
        Self {
            id,
            message_type,
            content,
            created_at,
            scheduled_at,
            processed_at: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Eligible for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_processed() && self.scheduled_at <= now
    }

    pub fn state(&self) -> MessageState {
        if self.is_processed() {
            MessageState::Processed
        } else if self.retry_count > 0 {
            MessageState::Failing
        } else {
            MessageState::Pending
        }
    }

    /// Record a successful dispatch. Returns `false` when the message was
    /// already processed, leaving the original timestamp untouched.
    pub fn mark_processed(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_processed() {
            return false;
        }
        self.processed_at = Some(at);
        self.error = None;
        true
    }

    /// Record a failed dispatch. `next_run_at` only ever moves the schedule
    /// forward. Returns `false` for processed messages.
    pub fn mark_failed(&mut self, error: String, next_run_at: Option<DateTime<Utc>>) -> bool {
        if self.is_processed() {
            return false;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        self.error = Some(error);
        if let Some(next) = next_run_at {
            self.scheduled_at = self.scheduled_at.max(next);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(scheduled_at: Option<DateTime<Utc>>) -> OutboxMessage {
        OutboxMessage::new(
            MessageId::from_ulid(Ulid::new()),
            MessageType::event("OrderCancelled"),
            "{}".to_string(),
            at(0),
            scheduled_at,
        )
    }

    #[test]
    fn schedule_defaults_to_creation_time() {
        let msg = message(None);
        assert_eq!(msg.scheduled_at, msg.created_at);
        assert_eq!(msg.state(), MessageState::Pending);
    }

    #[test]
    fn schedule_is_clamped_to_creation_time() {
        let msg = message(Some(at(-60)));
        assert_eq!(msg.scheduled_at, at(0));
    }

    #[test]
    fn due_only_once_scheduled_time_passes() {
        let msg = message(Some(at(10)));
        assert!(!msg.is_due(at(9)));
        assert!(msg.is_due(at(10)));
    }

    #[test]
    fn failure_increments_retry_count_and_keeps_error() {
        let mut msg = message(None);
        assert!(msg.mark_failed("boom".into(), None));
        assert!(msg.mark_failed("boom again".into(), None));
        assert_eq!(msg.retry_count, 2);
        assert_eq!(msg.error.as_deref(), Some("boom again"));
        assert_eq!(msg.scheduled_at, at(0));
        assert_eq!(msg.state(), MessageState::Failing);
    }

    #[test]
    fn failure_never_moves_schedule_backwards() {
        let mut msg = message(Some(at(30)));
        msg.mark_failed("boom".into(), Some(at(5)));
        assert_eq!(msg.scheduled_at, at(30));
        msg.mark_failed("boom".into(), Some(at(30) + Duration::seconds(4)));
        assert_eq!(msg.scheduled_at, at(34));
    }

    #[test]
    fn processed_is_terminal() {
        let mut msg = message(None);
        msg.mark_failed("boom".into(), None);
        assert!(msg.mark_processed(at(1)));
        assert_eq!(msg.error, None);

        assert!(!msg.mark_processed(at(2)));
        assert!(!msg.mark_failed("late".into(), None));
        assert_eq!(msg.processed_at, Some(at(1)));
        assert_eq!(msg.retry_count, 1);
        assert!(!msg.is_due(at(100)));
        assert!(msg.state().is_terminal());
    }
}
