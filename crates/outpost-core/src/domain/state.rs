//! Message state, derived from the record's timestamps and counters.

use serde::{Deserialize, Serialize};

/// Where a message sits in its lifecycle.
///
/// State transitions:
/// - Pending -> Processed
/// - Pending -> Failing -> Failing ... -> Processed
///
/// There is no dead state: a message that never succeeds stays `Failing`
/// forever and is never swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Written, never attempted or never failed.
    Pending,

    /// At least one attempt failed; still eligible for dispatch.
    Failing,

    /// Dispatched successfully. Terminal.
    Processed,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Processed)
    }
}
