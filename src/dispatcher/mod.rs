//! Command Dispatch Seam
//!
//! The transport consumes point-to-point and broadcast RPC as a black box: a
//! named channel that can call one member or all members and report each
//! member's completion independently. Two implementations are shipped:
//!
//! - **`local`**: an in-memory mesh over a `LocalCluster`; deterministic,
//!   used by the test suites.
//! - **`http`**: the inter-node wire used by real deployments: an axum
//!   endpoint receiving JSON command envelopes and a reqwest client sending
//!   them. No automatic retries; retry policy belongs to the caller.

pub mod http;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;

use crate::group::types::Member;
use crate::protocol::command::{Command, CommandResponse};

/// Outcome of one member's execution of a dispatched command.
///
/// `Cancelled` means the call produced no result because the target departed
/// (or was never reachable in the caller's partition); it is deliberately
/// distinct from `Failed`, which reports a genuine transport-level error.
#[derive(Debug)]
pub enum CallOutcome {
    Completed(CommandResponse),
    Failed(String),
    Cancelled,
}

/// Executes inbound commands on the receiving node.
#[async_trait]
pub trait CommandReceiver: Send + Sync {
    async fn receive(&self, command: Command) -> CommandResponse;
}

/// A live dispatch channel bound to one logical name.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Sends `command` to a single member and waits for its outcome.
    async fn call_one(&self, command: Command, target: &Member) -> CallOutcome;

    /// Sends `command` to every other member of the current view and waits
    /// for every individual completion.
    async fn call_all(&self, command: Command) -> Vec<(Member, CallOutcome)>;

    /// Releases the channel; subsequent inbound calls to this node cancel.
    async fn close(&self);
}

/// Factory for dispatch channels.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn create_channel(
        &self,
        name: &str,
        receiver: Arc<dyn CommandReceiver>,
    ) -> anyhow::Result<Arc<dyn Channel>>;
}
