//! Node-Local Cluster State
//!
//! Holds everything a node believes about the distributed work managers in the
//! cluster. All three ledgers are advisory: values converge through explicit
//! commands and membership reconciliation rather than consensus, so readers must
//! tolerate stale or missing entries.
//!
//! ## Submodules
//! - **`registry`**: maps each work-manager address to the member hosting it.
//! - **`capacity`**: per-address free-capacity counters (short/long running).
//! - **`statistics`**: per-address distributed work statistics, maintained on
//!   the member that owns the address.

pub mod capacity;
pub mod registry;
pub mod statistics;
