use serde::{Deserialize, Serialize};

/// Identifier of one work-manager instance, independent of which cluster
/// member currently hosts it.
///
/// Opaque to the transport: supplied by the work-execution engine when a work
/// manager registers, compared and forwarded but never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub String);

impl Address {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}
