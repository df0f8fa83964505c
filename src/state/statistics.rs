//! Distributed Statistics Ledger
//!
//! Aggregated work counters kept per address on the member that owns it.
//! Events are reported as deltas: the owner records outcomes of work it
//! executes directly, and other nodes push their observations to the owner via
//! the DELTA_* commands.

use crate::transport::types::Address;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Snapshot of the aggregated counters for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedStatistics {
    pub do_work_accepted: u64,
    pub do_work_rejected: u64,
    pub start_work_accepted: u64,
    pub start_work_rejected: u64,
    pub schedule_work_accepted: u64,
    pub schedule_work_rejected: u64,
    pub work_successful: u64,
    pub work_failed: u64,
}

/// The event classes a delta report can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    DoWorkAccepted,
    DoWorkRejected,
    StartWorkAccepted,
    StartWorkRejected,
    ScheduleWorkAccepted,
    ScheduleWorkRejected,
    WorkSuccessful,
    WorkFailed,
}

/// Concurrent per-address statistics counters.
pub struct StatisticsLedger {
    map: DashMap<Address, DistributedStatistics>,
}

impl StatisticsLedger {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Applies a single delta to the counters for `address`, creating the
    /// entry on first report.
    pub fn delta(&self, address: &Address, kind: DeltaKind) {
        let mut entry = self.map.entry(address.clone()).or_default();
        match kind {
            DeltaKind::DoWorkAccepted => entry.do_work_accepted += 1,
            DeltaKind::DoWorkRejected => entry.do_work_rejected += 1,
            DeltaKind::StartWorkAccepted => entry.start_work_accepted += 1,
            DeltaKind::StartWorkRejected => entry.start_work_rejected += 1,
            DeltaKind::ScheduleWorkAccepted => entry.schedule_work_accepted += 1,
            DeltaKind::ScheduleWorkRejected => entry.schedule_work_rejected += 1,
            DeltaKind::WorkSuccessful => entry.work_successful += 1,
            DeltaKind::WorkFailed => entry.work_failed += 1,
        }
    }

    /// Current counters for `address`; all zero when nothing was reported yet.
    pub fn snapshot(&self, address: &Address) -> DistributedStatistics {
        self.map
            .get(address)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Resets the counters for `address` to zero.
    pub fn clear(&self, address: &Address) {
        if let Some(mut entry) = self.map.get_mut(address) {
            *entry = DistributedStatistics::default();
        }
    }

    /// Drops the entry entirely, called when the address is evicted.
    pub fn remove(&self, address: &Address) {
        self.map.remove(address);
    }
}

impl Default for StatisticsLedger {
    fn default() -> Self {
        Self::new()
    }
}
