//! Group Module Tests
//!
//! This module contains unit tests for the membership seam and the in-process
//! cluster fabric.
//!
//! ## Test Scopes
//! - **Views**: Verifies structural comparison, containment and departure diffs.
//! - **Local Cluster**: Verifies join/leave notifications, partition splits and
//!   merged-flag semantics on heal.
//! - **Registrations**: Verifies listener deregistration on close and drop.
//! - **Gossip**: Verifies service construction, the single-member bootstrap
//!   view and in-order view-change delivery.

#[cfg(test)]
mod tests {
    use crate::group::gossip::{GossipMembership, GossipMessage, GossipNode, NodeState};
    use crate::group::local::LocalCluster;
    use crate::group::types::{Member, MembershipView};
    use crate::group::{GroupMembership, MembershipListener, Registration};

    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::Mutex;

    /// Records every view change it observes.
    struct RecordingListener {
        events: Mutex<Vec<(MembershipView, MembershipView, bool)>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        async fn events(&self) -> Vec<(MembershipView, MembershipView, bool)> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl MembershipListener for RecordingListener {
        async fn membership_changed(
            &self,
            previous: MembershipView,
            current: MembershipView,
            merged: bool,
        ) {
            self.events.lock().await.push((previous, current, merged));
        }
    }

    // ============================================================
    // TEST 1: MembershipView - structural semantics
    // ============================================================

    #[test]
    fn test_view_sorts_and_dedups() {
        let a = Member("a".to_string());
        let b = Member("b".to_string());

        let view = MembershipView::new(vec![b.clone(), a.clone(), b.clone()]);

        assert_eq!(view.members, vec![a, b]);
    }

    #[test]
    fn test_view_compares_regardless_of_discovery_order() {
        let a = Member("a".to_string());
        let b = Member("b".to_string());

        let forward = MembershipView::new(vec![a.clone(), b.clone()]);
        let backward = MembershipView::new(vec![b, a]);

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_view_departed_since() {
        let a = Member("a".to_string());
        let b = Member("b".to_string());
        let c = Member("c".to_string());

        let previous = MembershipView::new(vec![a.clone(), b.clone(), c.clone()]);
        let current = MembershipView::new(vec![a.clone(), c.clone()]);

        assert_eq!(previous.departed_since(&current), vec![b]);
        assert!(current.departed_since(&previous).is_empty());
        assert!(previous.contains(&a));
        assert!(!current.contains(&Member("d".to_string())));
    }

    // ============================================================
    // TEST 2: LocalCluster - join and leave notifications
    // ============================================================

    #[tokio::test]
    async fn test_cluster_join_notifies_existing_members() {
        // ARRANGE: one member already in the cluster, listening
        let cluster = LocalCluster::new();
        let first = Member::new();
        cluster.join(first.clone()).await;

        let listener = RecordingListener::new();
        let group = cluster.handle(first.clone());
        let _registration = group
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();

        // ACT: a second member joins
        let second = Member::new();
        cluster.join(second.clone()).await;

        // ASSERT: the first member observed the grown view, not a merge
        let events = listener.events().await;
        assert_eq!(events.len(), 1);
        let (previous, current, merged) = &events[0];
        assert!(!previous.contains(&second));
        assert!(current.contains(&first));
        assert!(current.contains(&second));
        assert!(!merged);
    }

    #[tokio::test]
    async fn test_cluster_leave_shrinks_view_and_notifies() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let stayer = Member::new();
        let leaver = Member::new();
        cluster.join(stayer.clone()).await;
        cluster.join(leaver.clone()).await;

        let listener = RecordingListener::new();
        let group = cluster.handle(stayer.clone());
        let _registration = group
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();

        // ACT
        cluster.leave(&leaver).await;

        // ASSERT
        let events = listener.events().await;
        assert_eq!(events.len(), 1);
        let (previous, current, merged) = &events[0];
        assert_eq!(previous.departed_since(current), vec![leaver.clone()]);
        assert!(!merged);
        assert!(!cluster.view_seen_by(&stayer).contains(&leaver));
        assert!(cluster.view_seen_by(&leaver).members.is_empty());
    }

    #[tokio::test]
    async fn test_cluster_join_is_idempotent() {
        let cluster = LocalCluster::new();
        let member = Member::new();

        cluster.join(member.clone()).await;
        cluster.join(member.clone()).await;

        assert_eq!(cluster.view_seen_by(&member).members, vec![member]);
    }

    // ============================================================
    // TEST 3: LocalCluster - split and heal
    // ============================================================

    #[tokio::test]
    async fn test_split_confines_views_to_partitions() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = Member::new();
        let b = Member::new();
        let c = Member::new();
        cluster.join(a.clone()).await;
        cluster.join(b.clone()).await;
        cluster.join(c.clone()).await;

        // ACT: isolate c from a and b
        cluster
            .split(&[vec![a.clone(), b.clone()], vec![c.clone()]])
            .await;

        // ASSERT
        let view_a = cluster.view_seen_by(&a);
        assert!(view_a.contains(&b));
        assert!(!view_a.contains(&c));
        assert_eq!(cluster.view_seen_by(&c).members, vec![c]);
    }

    #[tokio::test]
    async fn test_heal_restores_full_view_with_merged_flag() {
        // ARRANGE: two partitioned members, one listening
        let cluster = LocalCluster::new();
        let a = Member::new();
        let b = Member::new();
        cluster.join(a.clone()).await;
        cluster.join(b.clone()).await;
        cluster.split(&[vec![a.clone()], vec![b.clone()]]).await;

        let listener = RecordingListener::new();
        let group = cluster.handle(a.clone());
        let _registration = group
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();

        // ACT
        cluster.heal().await;

        // ASSERT: the heal event carries merged = true
        let events = listener.events().await;
        assert_eq!(events.len(), 1);
        let (previous, current, merged) = &events[0];
        assert!(!previous.contains(&b));
        assert!(current.contains(&b));
        assert!(*merged);
        assert_eq!(cluster.view_seen_by(&a), cluster.view_seen_by(&b));
    }

    // ============================================================
    // TEST 4: Registration - deregistration semantics
    // ============================================================

    #[tokio::test]
    async fn test_closed_registration_stops_notifications() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let member = Member::new();
        cluster.join(member.clone()).await;

        let listener = RecordingListener::new();
        let group = cluster.handle(member.clone());
        let registration = group
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();

        // ACT: close, then change the view
        registration.close();
        cluster.join(Member::new()).await;

        // ASSERT
        assert!(listener.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_registration_stops_notifications() {
        let cluster = LocalCluster::new();
        let member = Member::new();
        cluster.join(member.clone()).await;

        let listener = RecordingListener::new();
        let group = cluster.handle(member.clone());
        drop(
            group
                .register(listener.clone() as Arc<dyn MembershipListener>)
                .unwrap(),
        );

        cluster.join(Member::new()).await;

        assert!(listener.events().await.is_empty());
    }

    #[test]
    fn test_registration_is_shareable_across_tasks() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<Registration>();
    }

    // ============================================================
    // TEST 5: GossipMembership - construction and bootstrap view
    // ============================================================

    #[tokio::test]
    async fn test_gossip_membership_starts_with_single_member_view() {
        // ARRANGE / ACT: bind on an ephemeral port, no seeds
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let rpc: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let gossip = GossipMembership::new(bind, rpc, Vec::new()).await.unwrap();

        // ASSERT: the view contains exactly the local member
        let local = gossip.local_member();
        assert_eq!(gossip.current_membership().members, vec![local.clone()]);
        assert_ne!(gossip.gossip_addr().port(), 0);
        assert_eq!(gossip.rpc_addr_of(&local), Some(rpc));

        // Listener registration works on the gossip provider too
        let listener = RecordingListener::new();
        let registration = gossip
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();
        registration.close();
        assert!(listener.events().await.is_empty());
    }

    // ============================================================
    // TEST 6: GossipMembership - in-order view-change delivery
    // ============================================================

    fn join_datagram(gossip_addr: SocketAddr) -> (Member, Vec<u8>) {
        let member = Member::new();
        let node = GossipNode {
            member: member.clone(),
            gossip_addr,
            rpc_addr: "127.0.0.1:9101".parse().unwrap(),
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: None,
        };
        let encoded = bincode::serialize(&GossipMessage::Join { node }).unwrap();
        (member, encoded)
    }

    #[tokio::test]
    async fn test_gossip_delivers_view_changes_in_order() {
        // ARRANGE: a started gossip service with a recording listener
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let rpc: SocketAddr = "127.0.0.1:9102".parse().unwrap();
        let gossip = GossipMembership::new(bind, rpc, Vec::new()).await.unwrap();

        let listener = RecordingListener::new();
        let _registration = gossip
            .register(listener.clone() as Arc<dyn MembershipListener>)
            .unwrap();
        gossip.clone().start().await;

        // ACT: two join announcements arrive back to back
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (first, first_join) = join_datagram(sender.local_addr().unwrap());
        let (second, second_join) = join_datagram(sender.local_addr().unwrap());
        sender.send_to(&first_join, gossip.gossip_addr()).await.unwrap();
        sender.send_to(&second_join, gossip.gossip_addr()).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let events = loop {
            let events = listener.events().await;
            if events.len() >= 2 {
                break events;
            }
            assert!(Instant::now() < deadline, "view changes never arrived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        // ASSERT: the transitions chain, each current is the next previous
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, events[1].0);
        assert!(events[0].2);
        assert!(events[1].2);
        assert_eq!(events[1].1.members.len(), 3);
        assert!(events[1].1.contains(&first));
        assert!(events[1].1.contains(&second));
    }
}
