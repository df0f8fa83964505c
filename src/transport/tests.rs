//! Transport Module Tests
//!
//! This module contains integration tests for the transport core, run over the
//! in-process cluster fabric and the in-memory dispatcher so multi-node
//! scenarios stay deterministic.
//!
//! ## Test Scopes
//! - **Lifecycle**: Verifies the created/started/stopped state machine.
//! - **Address Propagation**: Verifies add/remove/update broadcasts, join
//!   discovery, graceful and abrupt departures, and partition heals.
//! - **Broadcast Semantics**: Verifies all-or-nothing failure reporting and
//!   that cancelled calls to departed peers are ignored.
//! - **Work Forwarding**: Verifies owner routing, statistics accounting and
//!   the error taxonomy for rejected and failed work.

#[cfg(test)]
mod tests {
    use crate::dispatcher::local::LocalDispatcher;
    use crate::dispatcher::{CommandDispatcher, CommandReceiver};
    use crate::engine::WorkEngine;
    use crate::engine::pool::PooledWorkEngine;
    use crate::engine::registry::WorkHandlerRegistry;
    use crate::engine::types::WorkItem;
    use crate::group::GroupMembership;
    use crate::group::local::LocalCluster;
    use crate::group::types::Member;
    use crate::protocol::command::{Command, CommandResponse};
    use crate::state::statistics::DistributedStatistics;
    use crate::transport::core::TransportCore;
    use crate::transport::error::TransportError;
    use crate::transport::types::Address;

    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CHANNEL: &str = "workmanager";

    struct TestNode {
        member: Member,
        handlers: Arc<WorkHandlerRegistry>,
        transport: Arc<TransportCore>,
    }

    /// Joins a fresh member to `cluster` and brings up a full transport stack
    /// on it.
    async fn start_node(cluster: &Arc<LocalCluster>, short: usize, long: usize) -> TestNode {
        let node = build_node(cluster, short, long).await;
        node.transport.startup().await.unwrap();
        node
    }

    async fn build_node(cluster: &Arc<LocalCluster>, short: usize, long: usize) -> TestNode {
        let member = Member::new();
        cluster.join(member.clone()).await;

        let group: Arc<dyn GroupMembership> = Arc::new(cluster.handle(member.clone()));
        let dispatcher: Arc<dyn CommandDispatcher> =
            LocalDispatcher::new(Arc::clone(cluster), member.clone());
        let handlers = WorkHandlerRegistry::new();
        let engine: Arc<dyn WorkEngine> = PooledWorkEngine::new(handlers.clone(), short, long);

        TestNode {
            member,
            handlers,
            transport: TransportCore::new(CHANNEL, group, dispatcher, engine),
        }
    }

    // ============================================================
    // TEST 1: Lifecycle state machine
    // ============================================================

    #[tokio::test]
    async fn test_operations_fail_before_startup() {
        let cluster = LocalCluster::new();
        let node = build_node(&cluster, 1, 1).await;

        let result = node.transport.add_work_manager(Address::new()).await;

        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let cluster = LocalCluster::new();
        let node = start_node(&cluster, 1, 1).await;

        node.transport.shutdown().await.unwrap();
        let result = node.transport.add_work_manager(Address::new()).await;

        assert!(matches!(result, Err(TransportError::Stopped)));
    }

    #[tokio::test]
    async fn test_startup_is_idempotent_but_not_restartable() {
        let cluster = LocalCluster::new();
        let node = start_node(&cluster, 1, 1).await;

        // Second startup on a started transport is a no-op.
        node.transport.startup().await.unwrap();

        // Shutdown twice is fine; startup afterwards is not.
        node.transport.shutdown().await.unwrap();
        node.transport.shutdown().await.unwrap();
        assert!(matches!(
            node.transport.startup().await,
            Err(TransportError::Stopped)
        ));
    }

    // ============================================================
    // TEST 2: Address propagation and join discovery
    // ============================================================

    #[tokio::test]
    async fn test_add_work_manager_propagates_to_peers() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 4, 1).await;
        let b = start_node(&cluster, 4, 1).await;

        // ACT
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        // ASSERT: both nodes agree on the owner and the announced capacity
        assert_eq!(a.transport.registry().member_of(&address), Some(a.member.clone()));
        assert_eq!(b.transport.registry().member_of(&address), Some(a.member.clone()));
        assert_eq!(b.transport.short_running_free(&address), 4);
        assert_eq!(b.transport.long_running_free(&address), 1);
    }

    #[tokio::test]
    async fn test_late_joiner_discovers_existing_addresses() {
        // ARRANGE: a node with a registered address, then a late joiner
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 3, 2).await;
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT
        let b = start_node(&cluster, 1, 1).await;

        // ASSERT: the joiner learned the address and its capacity without any
        // further announcement
        assert_eq!(b.transport.registry().member_of(&address), Some(a.member.clone()));
        assert_eq!(b.transport.short_running_free(&address), 3);
        assert_eq!(b.transport.long_running_free(&address), 2);
    }

    #[tokio::test]
    async fn test_three_nodes_converge_on_interleaved_adds() {
        // ARRANGE: registrations interleaved with startups
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 2, 1).await;
        let addr_a = Address::new();
        a.transport.add_work_manager(addr_a.clone()).await.unwrap();

        let b = start_node(&cluster, 2, 1).await;
        let addr_b = Address::new();
        b.transport.add_work_manager(addr_b.clone()).await.unwrap();

        let c = start_node(&cluster, 2, 1).await;
        let addr_c = Address::new();
        c.transport.add_work_manager(addr_c.clone()).await.unwrap();

        // ASSERT: every node sees all three addresses with the right owners
        for node in [&a, &b, &c] {
            assert_eq!(node.transport.registry().member_of(&addr_a), Some(a.member.clone()));
            assert_eq!(node.transport.registry().member_of(&addr_b), Some(b.member.clone()));
            assert_eq!(node.transport.registry().member_of(&addr_c), Some(c.member.clone()));
            assert_eq!(node.transport.registry().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_remove_work_manager_propagates() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        a.transport.remove_work_manager(&address).await.unwrap();

        assert_eq!(a.transport.registry().member_of(&address), None);
        assert_eq!(b.transport.registry().member_of(&address), None);
        assert_eq!(b.transport.short_running_free(&address), 0);
    }

    #[tokio::test]
    async fn test_capacity_updates_propagate_and_are_idempotent() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 2, 2).await;
        let b = start_node(&cluster, 2, 2).await;
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT: publish the same figure twice, then a different one
        a.transport.update_short_running_free(&address, 5).await.unwrap();
        a.transport.update_short_running_free(&address, 5).await.unwrap();
        a.transport.update_long_running_free(&address, -1).await.unwrap();

        // ASSERT
        assert_eq!(b.transport.short_running_free(&address), 5);
        assert_eq!(b.transport.long_running_free(&address), -1);
        assert_eq!(a.transport.short_running_free(&address), 5);
    }

    // ============================================================
    // TEST 3: Departures
    // ============================================================

    #[tokio::test]
    async fn test_graceful_leave_evicts_addresses_and_capacity() {
        // ARRANGE: a registered address with a published capacity
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();
        a.transport.update_short_running_free(&address, 5).await.unwrap();
        assert_eq!(b.transport.short_running_free(&address), 5);

        // ACT: graceful departure
        a.transport.shutdown().await.unwrap();

        // ASSERT: the peer forgot the address and reads defaults again
        assert_eq!(b.transport.registry().member_of(&address), None);
        assert_eq!(b.transport.short_running_free(&address), 0);
        assert_eq!(
            b.transport.get_distributed_statistics(&address).await.unwrap(),
            DistributedStatistics::default()
        );
    }

    #[tokio::test]
    async fn test_abrupt_departure_evicts_via_membership_event() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT: the member vanishes without a leave command
        cluster.leave(&a.member).await;

        // ASSERT
        assert_eq!(b.transport.registry().member_of(&address), None);
        assert_eq!(b.transport.short_running_free(&address), 0);
    }

    // ============================================================
    // TEST 4: Broadcast semantics
    // ============================================================

    /// A peer whose command execution always reports failure.
    struct FailingReceiver;

    #[async_trait]
    impl CommandReceiver for FailingReceiver {
        async fn receive(&self, _command: Command) -> CommandResponse {
            CommandResponse::Err {
                message: "induced failure".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_fails_when_any_peer_reports_failure() {
        // ARRANGE: a healthy node, then a peer that fails every command
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;

        let broken = Member::new();
        cluster.join(broken.clone()).await;
        let dispatcher = LocalDispatcher::new(Arc::clone(&cluster), broken.clone());
        let _channel = dispatcher
            .create_channel(CHANNEL, Arc::new(FailingReceiver))
            .await
            .unwrap();

        // ACT
        let result = a.transport.add_work_manager(Address::new()).await;

        // ASSERT: one failing peer fails the whole broadcast
        match result {
            Err(TransportError::Remote { member, message }) => {
                assert_eq!(member, broken);
                assert!(message.contains("induced failure"));
            }
            other => panic!("expected Remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_ignores_members_without_receivers() {
        // ARRANGE: a view member that never bound a receiver (mid-departure)
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        cluster.join(Member::new()).await;

        // ACT: calls to the silent member cancel, which is not a failure
        let address = Address::new();
        let result = a.transport.add_work_manager(address.clone()).await;

        // ASSERT
        assert!(result.is_ok());
        assert_eq!(b.transport.registry().member_of(&address), Some(a.member.clone()));
    }

    // ============================================================
    // TEST 5: Partition heal
    // ============================================================

    #[tokio::test]
    async fn test_heal_reconciles_addresses_added_during_partition() {
        // ARRANGE: two started nodes, then a partition between them
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 6, 3).await;
        let b = start_node(&cluster, 1, 1).await;
        cluster
            .split(&[vec![a.member.clone()], vec![b.member.clone()]])
            .await;

        // ACT: a registers an address only its own partition can see
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();
        assert_eq!(b.transport.registry().member_of(&address), None);

        cluster.heal().await;

        // ASSERT: the merge triggered discovery, including capacity
        assert_eq!(b.transport.registry().member_of(&address), Some(a.member.clone()));
        assert_eq!(b.transport.short_running_free(&address), 6);
        assert_eq!(b.transport.long_running_free(&address), 3);
    }

    // ============================================================
    // TEST 6: Work forwarding and statistics
    // ============================================================

    #[tokio::test]
    async fn test_do_work_routes_to_owner_and_counts_there() {
        // ARRANGE: b owns the address and hosts the handler
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 2, 1).await;
        let b = start_node(&cluster, 2, 1).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        b.handlers.register("echo", move |_work| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let address = Address::new();
        b.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT: submitted on a, executed on b
        a.transport
            .do_work(&address, WorkItem::short_running("echo", serde_json::json!({})))
            .await
            .unwrap();

        // ASSERT: ran exactly once, counted on the owner, visible from a
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let stats = a.transport.get_distributed_statistics(&address).await.unwrap();
        assert_eq!(stats.do_work_accepted, 1);
        assert_eq!(stats.work_successful, 1);
        assert_eq!(stats.do_work_rejected, 0);
    }

    #[tokio::test]
    async fn test_do_work_failure_is_reported_and_counted() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        b.handlers
            .register("boom", |_work| async { Err(anyhow::anyhow!("kaput")) });
        let address = Address::new();
        b.transport.add_work_manager(address.clone()).await.unwrap();

        let result = a
            .transport
            .do_work(&address, WorkItem::short_running("boom", serde_json::json!({})))
            .await;

        match result {
            Err(TransportError::Remote { member, message }) => {
                assert_eq!(member, b.member);
                assert!(message.contains("kaput"));
            }
            other => panic!("expected Remote error, got {:?}", other),
        }
        let stats = b.transport.get_distributed_statistics(&address).await.unwrap();
        assert_eq!(stats.do_work_accepted, 1);
        assert_eq!(stats.work_failed, 1);
        assert_eq!(stats.work_successful, 0);
    }

    #[tokio::test]
    async fn test_local_rejection_maps_to_work_rejected() {
        // ARRANGE: an owner with zero short-running slots
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 0, 1).await;
        a.handlers.register("noop", |_work| async { Ok(()) });
        let address = Address::new();
        a.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT: local submission, no forwarding involved
        let result = a
            .transport
            .do_work(&address, WorkItem::short_running("noop", serde_json::json!({})))
            .await;

        // ASSERT
        assert!(matches!(result, Err(TransportError::WorkRejected(_))));
        let stats = a.transport.get_distributed_statistics(&address).await.unwrap();
        assert_eq!(stats.do_work_rejected, 1);
        assert_eq!(stats.do_work_accepted, 0);
    }

    #[tokio::test]
    async fn test_work_on_unknown_address_fails_fast() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;

        let result = a
            .transport
            .do_work(&Address::new(), WorkItem::short_running("noop", serde_json::json!({})))
            .await;

        assert!(matches!(result, Err(TransportError::UnknownAddress(_))));
    }

    #[tokio::test]
    async fn test_start_and_schedule_work_forward_to_owner() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 2, 1).await;
        let b = start_node(&cluster, 2, 1).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        b.handlers.register("count", move |_work| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let address = Address::new();
        b.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT
        a.transport
            .start_work(&address, WorkItem::short_running("count", serde_json::json!({})))
            .await
            .unwrap();
        a.transport
            .schedule_work(&address, WorkItem::short_running("count", serde_json::json!({})))
            .await
            .unwrap();

        // ASSERT: both eventually execute on the owner
        while ran.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = a.transport.get_distributed_statistics(&address).await.unwrap();
        assert_eq!(stats.start_work_accepted, 1);
        assert_eq!(stats.schedule_work_accepted, 1);
    }

    // ============================================================
    // TEST 7: Statistics deltas and clearing
    // ============================================================

    #[tokio::test]
    async fn test_deltas_route_to_owner() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        let address = Address::new();
        b.transport.add_work_manager(address.clone()).await.unwrap();

        // ACT: observations reported from the non-owning node
        a.transport.delta_work_failed(&address).await.unwrap();
        a.transport.delta_schedule_work_rejected(&address).await.unwrap();
        a.transport.delta_schedule_work_rejected(&address).await.unwrap();

        // ASSERT: counted on the owner, readable from anywhere
        let stats = b.transport.get_distributed_statistics(&address).await.unwrap();
        assert_eq!(stats.work_failed, 1);
        assert_eq!(stats.schedule_work_rejected, 2);
        assert_eq!(
            a.transport.get_distributed_statistics(&address).await.unwrap(),
            stats
        );
    }

    #[tokio::test]
    async fn test_delta_for_unknown_address_is_dropped() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;

        // Routine churn race, must not error.
        a.transport.delta_do_work_accepted(&Address::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_statistics_resets_owner_counters() {
        // ARRANGE
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        let address = Address::new();
        b.transport.add_work_manager(address.clone()).await.unwrap();
        a.transport.delta_do_work_accepted(&address).await.unwrap();

        // ACT: cleared from the non-owning node
        a.transport.clear_distributed_statistics(&address).await.unwrap();

        // ASSERT
        assert_eq!(
            b.transport.get_distributed_statistics(&address).await.unwrap(),
            DistributedStatistics::default()
        );
    }

    #[tokio::test]
    async fn test_statistics_for_unknown_address_default() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;

        let stats = a
            .transport
            .get_distributed_statistics(&Address::new())
            .await
            .unwrap();

        assert_eq!(stats, DistributedStatistics::default());
    }

    // ============================================================
    // TEST 8: Ping
    // ============================================================

    #[tokio::test]
    async fn test_ping_round_trips_between_members() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;

        let elapsed = a.transport.ping(&b.member).await.unwrap();

        // In-memory round trips are effectively instant.
        assert!(elapsed < 1_000);
    }

    #[tokio::test]
    async fn test_ping_to_departed_member_fails() {
        let cluster = LocalCluster::new();
        let a = start_node(&cluster, 1, 1).await;
        let b = start_node(&cluster, 1, 1).await;
        cluster.leave(&b.member).await;

        let result = a.transport.ping(&b.member).await;

        assert!(matches!(result, Err(TransportError::Dispatch { .. })));
    }

    // ============================================================
    // TEST 9: Lifecycle concurrency
    // ============================================================

    #[test]
    fn test_transport_is_shareable_across_tasks() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<TransportCore>();
    }

    #[tokio::test]
    async fn test_shutdown_racing_startup_completes() {
        // A joiner's startup triggers a call chain back into itself: the peer
        // handling the join announcement unicasts discovery requests at the
        // joiner while its own broadcast is still in flight. A shutdown issued
        // concurrently must not wedge against that re-entrant traffic.
        for _ in 0..100 {
            let cluster = LocalCluster::new();
            let _peer = start_node(&cluster, 1, 1).await;
            let node = build_node(&cluster, 1, 1).await;

            let transport = node.transport.clone();
            let starter = tokio::spawn(async move {
                let _ = transport.startup().await;
            });
            let transport = node.transport.clone();
            let stopper = tokio::spawn(async move {
                let _ = transport.shutdown().await;
            });

            tokio::time::timeout(Duration::from_secs(5), async {
                starter.await.unwrap();
                stopper.await.unwrap();
            })
            .await
            .expect("startup/shutdown race did not complete");

            // Whichever order won, the transport ends up stopped.
            node.transport.shutdown().await.unwrap();
            assert!(matches!(
                node.transport.ping(&node.member).await,
                Err(TransportError::Stopped)
            ));
        }
    }

    #[tokio::test]
    async fn test_startup_succeeds_when_join_announcement_fails() {
        // ARRANGE: a peer that fails every inbound command, bound before the
        // new node comes up
        let cluster = LocalCluster::new();
        let broken = Member::new();
        cluster.join(broken.clone()).await;
        let dispatcher = LocalDispatcher::new(Arc::clone(&cluster), broken.clone());
        let _channel = dispatcher
            .create_channel(CHANNEL, Arc::new(FailingReceiver))
            .await
            .unwrap();

        // ACT: the join announcement is best-effort, startup still succeeds
        let node = build_node(&cluster, 1, 1).await;
        node.transport.startup().await.unwrap();

        // ASSERT: the transport is fully operative, not half-started
        let stats = node
            .transport
            .get_distributed_statistics(&Address::new())
            .await
            .unwrap();
        assert_eq!(stats, DistributedStatistics::default());
        node.transport.shutdown().await.unwrap();
    }
}
