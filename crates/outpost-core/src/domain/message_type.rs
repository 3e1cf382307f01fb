//! MessageType - the stable tag stored with every outbox message.
//!
//! # Naming convention
//! - Plain messages: `{namespace}.{domain}.{action}.v{major}`,
//!   e.g. `catalog.product.reindex.v1`
//! - Domain event notifications: `Event:{EventName}`, e.g. `Event:OrderCancelled`
//!
//! The tag is chosen by the producer and written to storage, so it must never
//! depend on a Rust type path. A message written by one build is read back by
//! another.

use std::fmt;

use serde::{Deserialize, Serialize};

const EVENT_PREFIX: &str = "Event:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Tag for a domain event notification, collapsing any wrapper to `Event:<name>`.
    pub fn event(name: &str) -> Self {
        Self(format!("{EVENT_PREFIX}{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The event name when this tag was built with [`MessageType::event`].
    pub fn event_name(&self) -> Option<&str> {
        self.0.strip_prefix(EVENT_PREFIX)
    }

    pub fn is_event(&self) -> bool {
        self.event_name().is_some()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
