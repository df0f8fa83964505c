//! Distributed Work-Manager Transport Library
//!
//! This library crate implements the transport subsystem that lets a cluster of
//! peer nodes share knowledge of each other's work-execution capacity and forward
//! work items for remote execution. It is the foundation for the node binary
//! (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`transport`**: The core orchestrator. Owns the lifecycle state machine,
//!   issues outbound unicast/broadcast calls, executes inbound commands and
//!   reconciles local state after membership changes.
//! - **`protocol`**: The typed command catalog exchanged between nodes (join,
//!   leave, capacity get/update, work submission, statistics, ping) and the
//!   execution contract each command runs against the receiving node.
//! - **`state`**: The node-local bookkeeping: which member hosts which
//!   work-manager address, advisory free-capacity counters, and aggregated
//!   distributed statistics.
//! - **`group`**: The cluster membership seam. Ships an in-process cluster for
//!   embedded use and tests, and a UDP gossip (SWIM-like) provider for real
//!   deployments.
//! - **`dispatcher`**: The request/response seam between nodes. Ships an
//!   in-memory mesh and an HTTP (axum + reqwest) implementation.
//! - **`engine`**: The work-execution seam: named async handlers executed under
//!   two capacity-bounded pools (short-running and long-running).

pub mod dispatcher;
pub mod engine;
pub mod group;
pub mod protocol;
pub mod state;
pub mod transport;
