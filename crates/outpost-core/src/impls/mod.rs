//! Impls - implementations of the ports.
//!
//! # Included
//! - **InMemoryOutboxStore**: tests and the demo binary
//! - **PgOutboxStore**: production store on PostgreSQL (sqlx)

pub mod memory;
pub mod postgres;

pub use self::memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use self::postgres::{PgOutboxStore, PgPool};
