use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of work, serializable so it can be forwarded to the member owning
/// the target work-manager address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Name of the registered handler to invoke (e.g. "reindex_shard").
    pub handler: String,
    /// Arbitrary JSON payload passed to the handler.
    pub payload: serde_json::Value,
    /// Whether the work should occupy a long-running slot.
    pub long_running: bool,
}

impl WorkItem {
    pub fn short_running(handler: &str, payload: serde_json::Value) -> Self {
        Self {
            handler: handler.to_string(),
            payload,
            long_running: false,
        }
    }

    pub fn long_running(handler: &str, payload: serde_json::Value) -> Self {
        Self {
            handler: handler.to_string(),
            payload,
            long_running: true,
        }
    }
}

/// Why the engine did not complete a work item.
///
/// `Rejected` means the work never ran (no capacity, unknown handler);
/// `Failed` means it was admitted but its execution errored. The distinction
/// drives which statistics counter the transport bumps.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("work rejected: {0}")]
    Rejected(String),
    #[error("work failed: {0}")]
    Failed(String),
}
