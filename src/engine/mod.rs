//! Work-Execution Engine Seam
//!
//! The transport forwards work items to the engine of the node that owns the
//! target address. The engine itself is a black box behind the `WorkEngine`
//! trait: it accepts or rejects work, runs it under the requested mode, and
//! exposes its free-capacity counters so the transport can gossip them to
//! peers.
//!
//! ## Submodules
//! - **`registry`**: maps handler names carried inside work items to async
//!   closures.
//! - **`pool`**: the shipped engine: two semaphore-bounded pools
//!   (short-running and long-running slots).

pub mod pool;
pub mod registry;
pub mod types;


use async_trait::async_trait;

use self::types::{EngineError, WorkItem};

#[async_trait]
pub trait WorkEngine: Send + Sync {
    /// Runs `work` to completion on the calling task (fire-and-wait).
    async fn do_work(&self, work: WorkItem) -> Result<(), EngineError>;

    /// Admits `work` and returns once it has started, reporting how many
    /// milliseconds the caller was blocked waiting for the start.
    async fn start_work(&self, work: WorkItem) -> Result<u64, EngineError>;

    /// Queues `work` for execution and returns immediately.
    async fn schedule_work(&self, work: WorkItem) -> Result<(), EngineError>;

    /// Free short-running execution slots right now.
    fn short_running_free(&self) -> i64;

    /// Free long-running execution slots right now.
    fn long_running_free(&self) -> i64;
}
