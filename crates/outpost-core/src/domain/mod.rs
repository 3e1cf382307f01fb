//! Domain model: message record, tags, ids, retry policy and errors.
//!
//! Nothing here knows about storage engines, timers or consumers.

pub mod errors;
pub mod ids;
pub mod message;
pub mod message_type;
pub mod retry;
pub mod state;

pub use self::errors::{ConsumerError, OutboxError};
pub use self::ids::{ClaimToken, MessageId};
pub use self::message::OutboxMessage;
pub use self::message_type::MessageType;
pub use self::retry::RetryPolicy;
pub use self::state::MessageState;
