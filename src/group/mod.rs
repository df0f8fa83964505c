//! Cluster Membership Seam
//!
//! The transport consumes group membership as a black box: who the local
//! member is, who is currently in the view, and asynchronous notifications
//! when the view changes. Two providers are shipped:
//!
//! - **`local`**: an in-process cluster fabric with explicit join/leave/split/
//!   heal controls. Deterministic, used by the test suites and usable for
//!   embedded single-process clusters.
//! - **`gossip`**: a UDP gossip (SWIM-like) provider with incarnation-based
//!   conflict resolution and Alive -> Suspect -> Dead failure detection.

pub mod gossip;
pub mod local;
pub mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;

use self::types::{Member, MembershipView};

/// Callback invoked on every membership-view change.
///
/// `merged` signals that previously-disjoint views were combined (a partition
/// healed or members were discovered out of band), which is the trigger for
/// full state reconciliation.
#[async_trait]
pub trait MembershipListener: Send + Sync {
    async fn membership_changed(
        &self,
        previous: MembershipView,
        current: MembershipView,
        merged: bool,
    );
}

/// A node's handle onto the cluster membership provider.
pub trait GroupMembership: Send + Sync {
    /// The identity of this node in the current view.
    fn local_member(&self) -> Member;

    /// The membership view as currently believed by this node.
    fn current_membership(&self) -> MembershipView;

    /// Registers a view-change listener. Dropping (or closing) the returned
    /// registration deregisters it.
    fn register(&self, listener: Arc<dyn MembershipListener>) -> anyhow::Result<Registration>;
}

/// Handle to a registered membership listener; deregisters on `close` or drop.
///
/// The callback is `Send + Sync` so the registration can live inside shared
/// service state.
pub struct Registration {
    deregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Registration {
    pub fn new(deregister: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            deregister: Some(Box::new(deregister)),
        }
    }

    pub fn close(mut self) {
        if let Some(deregister) = self.deregister.take() {
            deregister();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(deregister) = self.deregister.take() {
            deregister();
        }
    }
}
