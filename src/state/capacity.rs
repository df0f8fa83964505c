//! Capacity Ledger
//!
//! Per-address counters for short-running and long-running free capacity,
//! written by explicit capacity-update commands from the address's owning
//! member. The values are hints used to bias work placement, not admission
//! guarantees: they may be stale or even negative, and reads on an address
//! with no recorded value return zero rather than failing.

use crate::transport::types::Address;

use dashmap::DashMap;

/// Free execution slots reported for one address.
#[derive(Debug, Clone, Copy, Default)]
struct FreeCapacity {
    short_running: i64,
    long_running: i64,
}

/// Concurrent per-address capacity counters. Last write wins; no ordering is
/// enforced between updates from different sources.
pub struct CapacityLedger {
    map: DashMap<Address, FreeCapacity>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Short-running free capacity for `address`, zero when unreported.
    pub fn short_running(&self, address: &Address) -> i64 {
        self.map
            .get(address)
            .map(|entry| entry.short_running)
            .unwrap_or(0)
    }

    /// Long-running free capacity for `address`, zero when unreported.
    pub fn long_running(&self, address: &Address) -> i64 {
        self.map
            .get(address)
            .map(|entry| entry.long_running)
            .unwrap_or(0)
    }

    pub fn update_short_running(&self, address: &Address, value: i64) {
        self.map.entry(address.clone()).or_default().short_running = value;
    }

    pub fn update_long_running(&self, address: &Address, value: i64) {
        self.map.entry(address.clone()).or_default().long_running = value;
    }

    /// Drops the counters for an address, called when the address is evicted
    /// from the registry.
    pub fn remove(&self, address: &Address) {
        self.map.remove(address);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}
