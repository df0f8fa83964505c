use crate::group::types::Member;
use crate::transport::types::Address;

use thiserror::Error;

/// Failures surfaced by the transport's public API.
///
/// Lifecycle misuse fails fast and unambiguously; remote and dispatch failures
/// name the member involved so the caller can decide whether a retry makes
/// sense. The transport itself never retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport has not been started")]
    NotStarted,

    #[error("transport has been stopped")]
    Stopped,

    #[error("no member hosts address '{}'", (.0).0)]
    UnknownAddress(Address),

    #[error("work was not accepted: {0}")]
    WorkRejected(String),

    #[error("work execution failed: {0}")]
    WorkFailed(String),

    #[error("remote execution failed on {member:?}: {message}")]
    Remote { member: Member, message: String },

    #[error("dispatch to {member:?} failed: {message}")]
    Dispatch { member: Member, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
