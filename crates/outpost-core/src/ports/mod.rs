//! Ports - traits at the boundary between the pipeline and its environment.
//!
//! Storage engines, time and id minting are reached only through these traits
//! so that `app` can be exercised against in-memory implementations.

pub mod clock;
pub mod id_generator;
pub mod outbox_store;
pub mod transaction;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::outbox_store::{OutboxCounts, OutboxStore};
pub use self::transaction::OutboxTransaction;
