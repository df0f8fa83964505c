//! In-Process Cluster Fabric
//!
//! A deterministic membership provider for tests and embedded single-process
//! clusters. One `LocalCluster` plays the role a group-communication channel
//! plays in a real deployment: it tracks the view, delivers view-change
//! notifications synchronously, and carries the receiver bindings the local
//! dispatcher routes commands through.
//!
//! Network partitions are modelled explicitly: `split` confines each member to
//! a partition (calls across partitions cancel, views shrink), `heal` restores
//! the full view and fires notifications with `merged = true`.

use super::types::{Member, MembershipView};
use super::{GroupMembership, MembershipListener, Registration};
use crate::dispatcher::CommandReceiver;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub struct LocalCluster {
    /// Members currently in the cluster, with their partition assignment.
    view: Mutex<Vec<(Member, u32)>>,
    /// View-change listeners per member.
    listeners: DashMap<Member, DashMap<u64, Arc<dyn MembershipListener>>>,
    /// Command receivers per (member, channel name), used by the local
    /// dispatcher.
    receivers: DashMap<(Member, String), Arc<dyn CommandReceiver>>,
    listener_seq: AtomicU64,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            view: Mutex::new(Vec::new()),
            listeners: DashMap::new(),
            receivers: DashMap::new(),
            listener_seq: AtomicU64::new(0),
        })
    }

    /// Returns this member's handle onto the cluster.
    pub fn handle(self: &Arc<Self>, member: Member) -> LocalGroup {
        LocalGroup {
            cluster: Arc::clone(self),
            member,
        }
    }

    /// Adds a member to the cluster (partition 0) and notifies its partition.
    pub async fn join(&self, member: Member) {
        let (observers, previous, current) = {
            let mut view = self.view.lock().unwrap();
            let previous = Self::view_of_partition(&view, 0);
            if !view.iter().any(|(m, _)| m == &member) {
                view.push((member.clone(), 0));
            }
            let current = Self::view_of_partition(&view, 0);
            (Self::members_of_partition(&view, 0), previous, current)
        };
        self.notify(&observers, previous, current, false).await;
    }

    /// Removes a member abruptly: its receivers vanish (in-flight calls to it
    /// cancel) and the remaining members of its partition are notified.
    pub async fn leave(&self, member: &Member) {
        let (observers, previous, current) = {
            let mut view = self.view.lock().unwrap();
            let partition = match view.iter().find(|(m, _)| m == member) {
                Some((_, partition)) => *partition,
                None => return,
            };
            let previous = Self::view_of_partition(&view, partition);
            view.retain(|(m, _)| m != member);
            let current = Self::view_of_partition(&view, partition);
            (Self::members_of_partition(&view, partition), previous, current)
        };
        self.listeners.remove(member);
        self.receivers.retain(|(m, _), _| m != member);
        self.notify(&observers, previous, current, false).await;
    }

    /// Splits the cluster into disjoint partitions. Members see only their own
    /// partition afterwards; cross-partition calls cancel.
    pub async fn split(&self, groups: &[Vec<Member>]) {
        let changes = {
            let mut view = self.view.lock().unwrap();
            let old: Vec<(Member, MembershipView)> = view
                .iter()
                .map(|(m, p)| (m.clone(), Self::view_of_partition(&view, *p)))
                .collect();
            for (member, partition) in view.iter_mut() {
                for (index, group) in groups.iter().enumerate() {
                    if group.contains(member) {
                        *partition = index as u32;
                    }
                }
            }
            old.into_iter()
                .map(|(member, previous)| {
                    let partition = view
                        .iter()
                        .find(|(m, _)| *m == member)
                        .map(|(_, p)| *p)
                        .unwrap_or(0);
                    (member, previous, Self::view_of_partition(&view, partition))
                })
                .collect::<Vec<_>>()
        };
        for (member, previous, current) in changes {
            if previous != current {
                self.notify(std::slice::from_ref(&member), previous, current, false)
                    .await;
            }
        }
    }

    /// Heals all partitions back into one view and notifies every member with
    /// `merged = true`.
    pub async fn heal(&self) {
        let changes = {
            let mut view = self.view.lock().unwrap();
            let old: Vec<(Member, MembershipView)> = view
                .iter()
                .map(|(m, p)| (m.clone(), Self::view_of_partition(&view, *p)))
                .collect();
            for (_, partition) in view.iter_mut() {
                *partition = 0;
            }
            let merged_view = Self::view_of_partition(&view, 0);
            old.into_iter()
                .map(|(member, previous)| (member, previous, merged_view.clone()))
                .collect::<Vec<_>>()
        };
        for (member, previous, current) in changes {
            if previous != current {
                self.notify(std::slice::from_ref(&member), previous, current, true)
                    .await;
            }
        }
    }

    /// The view as seen by `member` (its own partition), empty for departed
    /// members.
    pub fn view_seen_by(&self, member: &Member) -> MembershipView {
        let view = self.view.lock().unwrap();
        match view.iter().find(|(m, _)| m == member) {
            Some((_, partition)) => Self::view_of_partition(&view, *partition),
            None => MembershipView::default(),
        }
    }

    pub(crate) fn same_partition(&self, a: &Member, b: &Member) -> bool {
        let view = self.view.lock().unwrap();
        let pa = view.iter().find(|(m, _)| m == a).map(|(_, p)| *p);
        let pb = view.iter().find(|(m, _)| m == b).map(|(_, p)| *p);
        matches!((pa, pb), (Some(pa), Some(pb)) if pa == pb)
    }

    pub(crate) fn bind_receiver(
        &self,
        member: Member,
        channel: String,
        receiver: Arc<dyn CommandReceiver>,
    ) {
        self.receivers.insert((member, channel), receiver);
    }

    pub(crate) fn unbind_receiver(&self, member: &Member, channel: &str) {
        self.receivers
            .remove(&(member.clone(), channel.to_string()));
    }

    pub(crate) fn receiver(
        &self,
        member: &Member,
        channel: &str,
    ) -> Option<Arc<dyn CommandReceiver>> {
        self.receivers
            .get(&(member.clone(), channel.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn view_of_partition(view: &[(Member, u32)], partition: u32) -> MembershipView {
        MembershipView::new(
            view.iter()
                .filter(|(_, p)| *p == partition)
                .map(|(m, _)| m.clone())
                .collect(),
        )
    }

    fn members_of_partition(view: &[(Member, u32)], partition: u32) -> Vec<Member> {
        view.iter()
            .filter(|(_, p)| *p == partition)
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Delivers a view change to every listener of every observer, awaiting
    /// each callback so tests observe a settled cluster when this returns.
    async fn notify(
        &self,
        observers: &[Member],
        previous: MembershipView,
        current: MembershipView,
        merged: bool,
    ) {
        for observer in observers {
            let listeners: Vec<Arc<dyn MembershipListener>> = match self.listeners.get(observer) {
                Some(entry) => entry.iter().map(|l| l.value().clone()).collect(),
                None => continue,
            };
            for listener in listeners {
                listener
                    .membership_changed(previous.clone(), current.clone(), merged)
                    .await;
            }
        }
    }
}

/// One member's handle onto a `LocalCluster`.
pub struct LocalGroup {
    cluster: Arc<LocalCluster>,
    member: Member,
}

impl GroupMembership for LocalGroup {
    fn local_member(&self) -> Member {
        self.member.clone()
    }

    fn current_membership(&self) -> MembershipView {
        self.cluster.view_seen_by(&self.member)
    }

    fn register(&self, listener: Arc<dyn MembershipListener>) -> anyhow::Result<Registration> {
        let id = self.cluster.listener_seq.fetch_add(1, Ordering::SeqCst);
        self.cluster
            .listeners
            .entry(self.member.clone())
            .or_default()
            .insert(id, listener);

        let cluster = Arc::clone(&self.cluster);
        let member = self.member.clone();
        Ok(Registration::new(move || {
            if let Some(listeners) = cluster.listeners.get(&member) {
                listeners.remove(&id);
            }
        }))
    }
}
