//! Typed - payload types bound to stable tags, and the consumers for them.
//!
//! # Two layers
//! - **Typed**: `Message`, `DomainEvent`, `Consumer<T>`. Tags and payload
//!   types are paired at compile time.
//! - **Dyn**: `DynConsumer`, object-safe, what the registry stores.

pub mod codec;
pub mod consumer;
pub mod message;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use self::codec::PayloadCodec;
pub use self::consumer::{Consumer, DynConsumer, FnConsumer, TypedConsumer};
pub use self::message::{DomainEvent, EventNotification, Message};
pub use self::registry::{ConsumerRegistry, RegistryError, decode_raw};
