//! Address Registry
//!
//! Maps each work-manager address to the cluster member currently hosting it.
//! One member may host several addresses; an address maps to at most one member
//! at a time. Every entry corresponds to a member the node currently believes
//! is part of the cluster; departures evict all of a member's addresses as a
//! set.

use crate::group::types::Member;
use crate::transport::types::Address;

use dashmap::DashMap;

/// Concurrent address-to-owner mapping.
///
/// Mutated from inbound command execution, membership reconciliation and the
/// local work-manager API, so entries live in a `DashMap` rather than behind a
/// single lock.
pub struct AddressRegistry {
    map: DashMap<Address, Member>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Associates `address` with `member`.
    ///
    /// Last writer wins: a concurrent join from a stale view can silently move
    /// an address between members, which is why an overwrite of a *different*
    /// live owner is logged.
    pub fn join(&self, address: Address, member: Member) {
        if let Some(previous) = self.map.insert(address.clone(), member.clone())
            && previous != member
        {
            tracing::warn!(
                "address {} moved from {:?} to {:?} without an explicit remove",
                address.0,
                previous,
                member
            );
        }
    }

    /// Removes a single address. Unknown addresses are a no-op: removal racing
    /// an eviction is routine, not an error.
    pub fn remove(&self, address: &Address) -> Option<Member> {
        self.map.remove(address).map(|(_, member)| member)
    }

    /// Removes every address hosted by `member` and returns the evicted set so
    /// the caller can drop dependent ledger entries.
    pub fn leave(&self, member: &Member) -> Vec<Address> {
        let mut evicted = Vec::new();
        self.map.retain(|address, owner| {
            if owner == member {
                evicted.push(address.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// The member currently believed to host `address`, if any.
    pub fn member_of(&self, address: &Address) -> Option<Member> {
        self.map.get(address).map(|entry| entry.value().clone())
    }

    /// All addresses currently believed hosted by `member`. Empty for unknown
    /// members; never fails.
    pub fn addresses(&self, member: &Member) -> Vec<Address> {
        self.map
            .iter()
            .filter(|entry| entry.value() == member)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Full copy of the registry, mostly for diagnostics and tests.
    pub fn snapshot(&self) -> Vec<(Address, Member)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new()
    }
}
