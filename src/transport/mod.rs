//! Transport Core Module
//!
//! Orchestrates everything the cluster sees of the local work manager: the
//! lifecycle state machine (created -> started -> stopped), outbound unicast
//! and broadcast calls, inbound command execution, and the reconciliation that
//! keeps the address registry correct through joins, leaves, crashes and
//! partition merges.
//!
//! ## Submodules
//! - **`core`**: the `TransportCore` itself.
//! - **`types`**: the work-manager address identifier.
//! - **`error`**: the caller-facing failure taxonomy.

pub mod core;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;
