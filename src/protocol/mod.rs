//! Inter-Node Command Protocol
//!
//! Defines the typed, serializable operations exchanged between transports and
//! the contract each one executes against the *receiving* node's state. The
//! catalog is symmetric: the same enum is the wire format and the local
//! execution dispatch, and every command carries exactly the data needed to
//! act without further round trips.

pub mod command;
