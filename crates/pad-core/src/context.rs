//! Run identifier for tracking a single script execution

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of one script run
///
/// Every run carries a RunId that shows up in log fields and run events,
/// so the output of overlapping runs (a rejected second start, a run that
/// is stopped while a new one is queued by the caller) can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Create a new run id with a fresh ULID
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Create a run id with a specific value
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
