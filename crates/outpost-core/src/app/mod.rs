//! App - the pipeline assembled from the ports.
//!
//! # Components
//! - **OutboxBuilder**: wiring and startup validation
//! - **OutboxWriter**: enqueue inside the caller's transaction
//! - **Dispatcher**: stored tag → consumers
//! - **Processor**: fetch → dispatch → mark loop
//! - **Sweeper**: retention cleanup of processed messages
//! - **OutboxService**: start/stop handle for both loops
//! - **OutboxStatus**: counts and stuck messages

pub mod builder;
pub mod dispatcher;
pub mod processor;
pub mod service;
pub mod status;
pub mod sweeper;
pub mod writer;

pub use self::builder::{BuildError, Outbox, OutboxBuilder};
pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::processor::{BatchReport, Processor};
pub use self::service::OutboxService;
pub use self::status::{OutboxStatus, StuckMessage};
pub use self::sweeper::Sweeper;
pub use self::writer::OutboxWriter;
