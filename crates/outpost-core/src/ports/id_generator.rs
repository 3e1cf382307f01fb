//! IdGenerator port - message id minting.
//!
//! # Implementations
//! - **UlidGenerator**: clock-driven, monotonic within a millisecond

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::MessageId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;
}

/// ULID generator driven by a [`Clock`].
///
/// Two ids minted in the same millisecond still sort in minting order, which
/// keeps messages enqueued together in one transaction in FIFO order when
/// their schedules tie.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
    generator: Mutex<Generator>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            generator: Mutex::new(Generator::new()),
        }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_message_id(&self) -> MessageId {
        let now = self.clock.now();
        let mut generator = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        match generator.generate_from_datetime(SystemTime::from(now)) {
            Ok(ulid) => MessageId::from(ulid),
            // Random part exhausted within one millisecond.
            Err(_) => {
                let timestamp_ms = u64::try_from(now.timestamp_millis()).unwrap_or_default();
                MessageId::from(Ulid::from_parts(timestamp_ms, rand::random()))
            }
        }
    }
}
