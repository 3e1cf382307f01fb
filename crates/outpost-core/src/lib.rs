//! outpost-core
//!
//! Transactional outbox: side effects are written as message records in the
//! same transaction as the domain change, then delivered at least once by a
//! background processor.
//!
//! # Modules
//! - **domain**: message record, tags, ids, retry policy, errors
//! - **ports**: OutboxStore, OutboxTransaction, Clock, IdGenerator
//! - **typed**: Message / DomainEvent traits, consumers, registry, codec
//! - **impls**: in-memory and PostgreSQL stores
//! - **app**: builder, writer, dispatcher, processor, sweeper, service
//! - **config**: environment configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{Outbox, OutboxBuilder, OutboxService, OutboxWriter};
pub use config::{ConfigError, OutboxConfig};
pub use domain::{ClaimToken, ConsumerError, MessageId, MessageType, OutboxError, OutboxMessage};
pub use typed::{Consumer, DomainEvent, EventNotification, Message};
