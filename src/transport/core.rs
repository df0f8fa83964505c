//! Transport Core
//!
//! One `TransportCore` instance per node owns that node's view of the
//! distributed work managers: the address registry, the capacity ledger and
//! the statistics ledger. All mutation of remote state goes through commands
//! executed on the owning node; all local mutation happens on behalf of
//! inbound commands, membership events, or the local work-manager API.
//!
//! ## Concurrency
//! Steady-state operations (outbound calls, inbound command execution,
//! membership callbacks) never block on a lock: each one checks the atomic
//! lifecycle state, registers itself in an in-flight counter and grabs the
//! channel handle from a briefly-held mutex. `startup` and `shutdown`
//! serialize on a control mutex; `shutdown` flips the state so no new
//! operation is admitted, then waits for the in-flight count to drain before
//! releasing the channel and the listener registration. Inbound calls that
//! arrive mid-teardown therefore answer with a failure value immediately
//! instead of queueing behind the teardown, which keeps re-entrant call
//! chains (a peer calling back while our own call to it is still in flight)
//! from wedging either node.

use crate::dispatcher::{CallOutcome, Channel, CommandDispatcher, CommandReceiver};
use crate::engine::WorkEngine;
use crate::engine::types::{EngineError, WorkItem};
use crate::group::types::{Member, MembershipView};
use crate::group::{GroupMembership, MembershipListener, Registration};
use crate::protocol::command::{Command, CommandResponse};
use crate::state::capacity::CapacityLedger;
use crate::state::registry::AddressRegistry;
use crate::state::statistics::{DeltaKind, DistributedStatistics, StatisticsLedger};
use crate::transport::error::TransportError;
use crate::transport::types::Address;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Notify;

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// One admitted steady-state operation. Holds the channel handle for its
/// duration and keeps the in-flight count up so `shutdown` waits for it.
struct Operation<'a> {
    core: &'a TransportCore,
    channel: Arc<dyn Channel>,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.core.end_operation();
    }
}

pub struct TransportCore {
    name: String,
    group: Arc<dyn GroupMembership>,
    dispatcher: Arc<dyn CommandDispatcher>,
    engine: Arc<dyn WorkEngine>,
    registry: AddressRegistry,
    capacity: CapacityLedger,
    statistics: StatisticsLedger,
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Notify,
    /// Channel handle for steady-state operations. Present exactly while
    /// started; the mutex is only ever held for the clone or the take.
    channel: Mutex<Option<Arc<dyn Channel>>>,
    /// Serializes `startup` against `shutdown` and holds the listener
    /// registration for the started lifetime.
    control: tokio::sync::Mutex<Option<Registration>>,
}

impl TransportCore {
    pub fn new(
        name: &str,
        group: Arc<dyn GroupMembership>,
        dispatcher: Arc<dyn CommandDispatcher>,
        engine: Arc<dyn WorkEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            group,
            dispatcher,
            engine,
            registry: AddressRegistry::new(),
            capacity: CapacityLedger::new(),
            statistics: StatisticsLedger::new(),
            state: AtomicU8::new(STATE_CREATED),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            channel: Mutex::new(None),
            control: tokio::sync::Mutex::new(None),
        })
    }

    /// Admits one steady-state operation, bumping the in-flight count before
    /// the state check so a concurrent `shutdown` either sees the operation
    /// and drains it, or has already flipped the state and the operation
    /// bails here.
    fn begin_operation(&self) -> Result<Operation<'_>, TransportError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        match self.state.load(Ordering::SeqCst) {
            STATE_STARTED => {}
            STATE_CREATED => {
                self.end_operation();
                return Err(TransportError::NotStarted);
            }
            _ => {
                self.end_operation();
                return Err(TransportError::Stopped);
            }
        }

        let channel = self
            .channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match channel {
            Some(channel) => Ok(Operation {
                core: self,
                channel,
            }),
            None => {
                self.end_operation();
                Err(TransportError::Stopped)
            }
        }
    }

    fn end_operation(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    // --- Lifecycle ---

    /// Acquires the dispatch channel, registers the membership listener,
    /// announces this transport to the cluster and runs the initial discovery
    /// pass.
    ///
    /// A failure acquiring either resource aborts startup without leaving a
    /// half-registered listener behind. The join announcement itself is
    /// best-effort: peers that miss it converge through membership
    /// reconciliation.
    pub async fn startup(self: &Arc<Self>) -> Result<(), TransportError> {
        let mut control = self.control.lock().await;
        match self.state.load(Ordering::SeqCst) {
            STATE_CREATED => {}
            STATE_STARTED => {
                tracing::debug!("transport '{}' already started", self.name);
                return Ok(());
            }
            _ => return Err(TransportError::Stopped),
        }

        let receiver: Arc<dyn CommandReceiver> = Arc::clone(self) as Arc<dyn CommandReceiver>;
        let channel = self
            .dispatcher
            .create_channel(&self.name, receiver)
            .await
            .map_err(TransportError::Internal)?;

        let listener: Arc<dyn MembershipListener> =
            Arc::clone(self) as Arc<dyn MembershipListener>;
        let registration = match self.group.register(listener) {
            Ok(registration) => registration,
            Err(e) => {
                channel.close().await;
                return Err(TransportError::Internal(e));
            }
        };

        *self
            .channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(channel);
        *control = Some(registration);
        self.state.store(STATE_STARTED, Ordering::SeqCst);

        // Announce to current peers and discover their addresses. Receivers of
        // the join reconcile against us; we reconcile against them.
        let operation = self.begin_operation()?;
        if let Err(e) = self.broadcast(&operation.channel, Command::Join).await {
            tracing::warn!("join announcement failed: {}", e);
        }
        self.reconcile(&operation.channel, &self.group.current_membership())
            .await;
        drop(operation);

        tracing::info!(
            "transport '{}' started as member {:?}",
            self.name,
            self.group.local_member()
        );

        Ok(())
    }

    /// Stops admitting operations, waits for every in-flight one to finish,
    /// broadcasts a best-effort leave and releases the channel and the
    /// listener registration. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        let mut control = self.control.lock().await;
        let was_started = self.state.swap(STATE_STOPPED, Ordering::SeqCst) == STATE_STARTED;
        if !was_started {
            return Ok(());
        }

        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }

        let channel = self
            .channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let registration = control.take();

        if let Some(channel) = channel {
            let leave = Command::Leave {
                member: self.group.local_member(),
            };
            // The node is tearing down anyway; a failed goodbye is only worth
            // a log line.
            if let Err(e) = self.broadcast(&channel, leave).await {
                tracing::warn!("leave broadcast failed during shutdown: {}", e);
            }
            channel.close().await;
        }

        if let Some(registration) = registration {
            registration.close();
        }

        tracing::info!("transport '{}' stopped", self.name);
        Ok(())
    }

    // --- Work-manager API (called by the local work-execution engine) ---

    /// Registers a local work-manager address and announces it cluster-wide,
    /// following up with this node's current capacity once the announcement
    /// has landed on every peer.
    pub async fn add_work_manager(&self, address: Address) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;
        let local = self.group.local_member();

        self.local_join(address.clone(), local.clone());
        self.broadcast(
            &operation.channel,
            Command::AddWorkManager {
                address: address.clone(),
                member: local,
            },
        )
        .await?;

        let short = self.engine.short_running_free();
        let long = self.engine.long_running_free();
        self.capacity.update_short_running(&address, short);
        self.capacity.update_long_running(&address, long);
        self.broadcast(
            &operation.channel,
            Command::UpdateShortRunningFree {
                address: address.clone(),
                free: short,
            },
        )
        .await?;
        self.broadcast(
            &operation.channel,
            Command::UpdateLongRunningFree {
                address,
                free: long,
            },
        )
        .await
    }

    /// Withdraws a local work-manager address cluster-wide.
    pub async fn remove_work_manager(&self, address: &Address) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;

        self.local_remove(address);
        self.broadcast(
            &operation.channel,
            Command::RemoveWorkManager {
                address: address.clone(),
            },
        )
        .await
    }

    /// Publishes a new short-running free-capacity figure for a local address.
    pub async fn update_short_running_free(
        &self,
        address: &Address,
        free: i64,
    ) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;

        self.capacity.update_short_running(address, free);
        self.broadcast(
            &operation.channel,
            Command::UpdateShortRunningFree {
                address: address.clone(),
                free,
            },
        )
        .await
    }

    /// Publishes a new long-running free-capacity figure for a local address.
    pub async fn update_long_running_free(
        &self,
        address: &Address,
        free: i64,
    ) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;

        self.capacity.update_long_running(address, free);
        self.broadcast(
            &operation.channel,
            Command::UpdateLongRunningFree {
                address: address.clone(),
                free,
            },
        )
        .await
    }

    /// Runs `work` to completion on the member owning `address`.
    pub async fn do_work(&self, address: &Address, work: WorkItem) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;
        let owner = self.owner_of(address)?;

        if owner == self.group.local_member() {
            return self
                .execute_do_work(address, work)
                .await
                .map_err(work_error);
        }

        let command = Command::DoWork {
            address: address.clone(),
            work,
        };
        match self.unicast(&operation.channel, command, &owner).await? {
            Some(_) => Ok(()),
            None => Err(TransportError::Dispatch {
                member: owner,
                message: "call cancelled before completion".to_string(),
            }),
        }
    }

    /// Starts `work` on the member owning `address`, returning the
    /// milliseconds spent waiting for the start.
    pub async fn start_work(
        &self,
        address: &Address,
        work: WorkItem,
    ) -> Result<u64, TransportError> {
        let operation = self.begin_operation()?;
        let owner = self.owner_of(address)?;

        if owner == self.group.local_member() {
            return self
                .execute_start_work(address, work)
                .await
                .map_err(work_error);
        }

        let command = Command::StartWork {
            address: address.clone(),
            work,
        };
        match self.unicast(&operation.channel, command, &owner).await? {
            Some(CommandResponse::Started { start_millis }) => Ok(start_millis),
            Some(other) => Err(TransportError::Remote {
                member: owner,
                message: format!("unexpected start-work response: {:?}", other),
            }),
            None => Err(TransportError::Dispatch {
                member: owner,
                message: "call cancelled before completion".to_string(),
            }),
        }
    }

    /// Queues `work` on the member owning `address`.
    pub async fn schedule_work(
        &self,
        address: &Address,
        work: WorkItem,
    ) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;
        let owner = self.owner_of(address)?;

        if owner == self.group.local_member() {
            return self
                .execute_schedule_work(address, work)
                .await
                .map_err(work_error);
        }

        let command = Command::ScheduleWork {
            address: address.clone(),
            work,
        };
        match self.unicast(&operation.channel, command, &owner).await? {
            Some(_) => Ok(()),
            None => Err(TransportError::Dispatch {
                member: owner,
                message: "call cancelled before completion".to_string(),
            }),
        }
    }

    /// Round-trips a ping to `member`, returning the elapsed milliseconds.
    pub async fn ping(&self, member: &Member) -> Result<u64, TransportError> {
        let operation = self.begin_operation()?;

        let sent = Instant::now();
        match self.unicast(&operation.channel, Command::Ping, member).await? {
            Some(CommandResponse::Pong { .. }) => Ok(sent.elapsed().as_millis() as u64),
            Some(other) => Err(TransportError::Remote {
                member: member.clone(),
                message: format!("unexpected ping response: {:?}", other),
            }),
            None => Err(TransportError::Dispatch {
                member: member.clone(),
                message: "ping cancelled".to_string(),
            }),
        }
    }

    /// Fetches the aggregated statistics for `address` from its owner. An
    /// address without a known owner, or an owner departing mid-call, yields
    /// the empty snapshot; statistics are advisory.
    pub async fn get_distributed_statistics(
        &self,
        address: &Address,
    ) -> Result<DistributedStatistics, TransportError> {
        let operation = self.begin_operation()?;

        let Some(owner) = self.registry.member_of(address) else {
            return Ok(DistributedStatistics::default());
        };
        if owner == self.group.local_member() {
            return Ok(self.statistics.snapshot(address));
        }

        let command = Command::GetDistributedStatistics {
            address: address.clone(),
        };
        match self.unicast(&operation.channel, command, &owner).await? {
            Some(CommandResponse::Statistics { statistics }) => Ok(statistics),
            Some(other) => Err(TransportError::Remote {
                member: owner,
                message: format!("unexpected statistics response: {:?}", other),
            }),
            None => Ok(DistributedStatistics::default()),
        }
    }

    /// Resets the aggregated statistics for `address` on its owner.
    pub async fn clear_distributed_statistics(
        &self,
        address: &Address,
    ) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;

        let Some(owner) = self.registry.member_of(address) else {
            return Ok(());
        };
        if owner == self.group.local_member() {
            self.statistics.clear(address);
            return Ok(());
        }

        let command = Command::ClearDistributedStatistics {
            address: address.clone(),
        };
        self.unicast(&operation.channel, command, &owner).await?;
        Ok(())
    }

    // --- Delta reporting (statistics events observed for a remote address) ---

    pub async fn delta_do_work_accepted(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::DoWorkAccepted).await
    }

    pub async fn delta_do_work_rejected(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::DoWorkRejected).await
    }

    pub async fn delta_start_work_accepted(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::StartWorkAccepted)
            .await
    }

    pub async fn delta_start_work_rejected(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::StartWorkRejected)
            .await
    }

    pub async fn delta_schedule_work_accepted(
        &self,
        address: &Address,
    ) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::ScheduleWorkAccepted)
            .await
    }

    pub async fn delta_schedule_work_rejected(
        &self,
        address: &Address,
    ) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::ScheduleWorkRejected)
            .await
    }

    pub async fn delta_work_successful(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::WorkSuccessful).await
    }

    pub async fn delta_work_failed(&self, address: &Address) -> Result<(), TransportError> {
        self.report_delta(address, DeltaKind::WorkFailed).await
    }

    /// Routes one statistics delta to the owner of `address`: applied directly
    /// when the local member owns it, unicast otherwise. Deltas for addresses
    /// with no known owner are dropped; the churn race is routine.
    async fn report_delta(
        &self,
        address: &Address,
        kind: DeltaKind,
    ) -> Result<(), TransportError> {
        let operation = self.begin_operation()?;

        let Some(owner) = self.registry.member_of(address) else {
            tracing::debug!("dropping {:?} delta for unowned address {}", kind, address.0);
            return Ok(());
        };
        if owner == self.group.local_member() {
            self.statistics.delta(address, kind);
            return Ok(());
        }

        self.unicast(
            &operation.channel,
            Command::for_delta(address.clone(), kind),
            &owner,
        )
        .await?;
        Ok(())
    }

    // --- Receiver-side execution (called by command dispatch) ---

    /// Runs do-work on the local engine, recording the outcome in the
    /// owner-local statistics: work for an address executes on its owner, so
    /// the counters are updated here and nowhere else.
    pub(crate) async fn execute_do_work(
        &self,
        address: &Address,
        work: WorkItem,
    ) -> Result<(), EngineError> {
        match self.engine.do_work(work).await {
            Ok(()) => {
                self.statistics.delta(address, DeltaKind::DoWorkAccepted);
                self.statistics.delta(address, DeltaKind::WorkSuccessful);
                Ok(())
            }
            Err(e @ EngineError::Rejected(_)) => {
                self.statistics.delta(address, DeltaKind::DoWorkRejected);
                Err(e)
            }
            Err(e @ EngineError::Failed(_)) => {
                self.statistics.delta(address, DeltaKind::DoWorkAccepted);
                self.statistics.delta(address, DeltaKind::WorkFailed);
                Err(e)
            }
        }
    }

    pub(crate) async fn execute_start_work(
        &self,
        address: &Address,
        work: WorkItem,
    ) -> Result<u64, EngineError> {
        match self.engine.start_work(work).await {
            Ok(start_millis) => {
                self.statistics.delta(address, DeltaKind::StartWorkAccepted);
                Ok(start_millis)
            }
            Err(e) => {
                self.statistics.delta(address, DeltaKind::StartWorkRejected);
                Err(e)
            }
        }
    }

    pub(crate) async fn execute_schedule_work(
        &self,
        address: &Address,
        work: WorkItem,
    ) -> Result<(), EngineError> {
        match self.engine.schedule_work(work).await {
            Ok(()) => {
                self.statistics
                    .delta(address, DeltaKind::ScheduleWorkAccepted);
                Ok(())
            }
            Err(e) => {
                self.statistics
                    .delta(address, DeltaKind::ScheduleWorkRejected);
                Err(e)
            }
        }
    }

    // --- Local state transitions ---

    pub(crate) fn local_join(&self, address: Address, member: Member) {
        tracing::debug!("registering address {} for member {:?}", address.0, member);
        self.registry.join(address, member);
    }

    pub(crate) fn local_remove(&self, address: &Address) {
        self.registry.remove(address);
        self.capacity.remove(address);
        self.statistics.remove(address);
    }

    pub(crate) fn local_leave(&self, member: &Member) {
        let evicted = self.registry.leave(member);
        if evicted.is_empty() {
            return;
        }
        tracing::info!(
            "evicting {} address(es) of departed member {:?}",
            evicted.len(),
            member
        );
        for address in &evicted {
            self.capacity.remove(address);
            self.statistics.remove(address);
        }
    }

    /// Addresses hosted by this node, as answered to join discovery.
    pub(crate) fn local_addresses(&self) -> Vec<Address> {
        self.registry.addresses(&self.group.local_member())
    }

    // --- Outbound plumbing ---

    fn owner_of(&self, address: &Address) -> Result<Member, TransportError> {
        self.registry
            .member_of(address)
            .ok_or_else(|| TransportError::UnknownAddress(address.clone()))
    }

    /// Sends `command` to every peer and waits for each individual completion.
    /// The broadcast succeeds only if every live member's copy succeeded;
    /// cancellations and failures from members that already left the view are
    /// expected churn and ignored.
    async fn broadcast(
        &self,
        channel: &Arc<dyn Channel>,
        command: Command,
    ) -> Result<(), TransportError> {
        let outcomes = channel.call_all(command).await;
        let view = self.group.current_membership();

        for (member, outcome) in outcomes {
            match outcome {
                CallOutcome::Completed(CommandResponse::Err { message }) => {
                    return Err(TransportError::Remote { member, message });
                }
                CallOutcome::Completed(_) => {}
                CallOutcome::Cancelled => {
                    tracing::debug!("broadcast to {:?} cancelled, member departing", member);
                }
                CallOutcome::Failed(message) => {
                    if view.contains(&member) {
                        return Err(TransportError::Dispatch { member, message });
                    }
                    tracing::debug!(
                        "ignoring broadcast failure from departed member {:?}: {}",
                        member,
                        message
                    );
                }
            }
        }

        Ok(())
    }

    /// Sends `command` to one member. `Ok(None)` means the call was cancelled
    /// (the target no longer matters); the caller decides whether "no result"
    /// is acceptable for its command.
    async fn unicast(
        &self,
        channel: &Arc<dyn Channel>,
        command: Command,
        target: &Member,
    ) -> Result<Option<CommandResponse>, TransportError> {
        match channel.call_one(command, target).await {
            CallOutcome::Completed(CommandResponse::Err { message }) => Err(TransportError::Remote {
                member: target.clone(),
                message,
            }),
            CallOutcome::Completed(response) => Ok(Some(response)),
            CallOutcome::Cancelled => Ok(None),
            CallOutcome::Failed(message) => Err(TransportError::Dispatch {
                member: target.clone(),
                message,
            }),
        }
    }

    /// Discovers the addresses (and capacity figures) of every member of
    /// `view` this node knows nothing about yet. Per-peer errors are logged
    /// and skipped: partial progress is fine, a later membership event
    /// retries.
    pub(crate) async fn reconcile(&self, channel: &Arc<dyn Channel>, view: &MembershipView) {
        let local = self.group.local_member();

        for member in &view.members {
            if *member == local || !self.registry.addresses(member).is_empty() {
                continue;
            }

            let addresses = match self.unicast(channel, Command::GetWorkManagers, member).await {
                Ok(Some(CommandResponse::WorkManagers { addresses })) => addresses,
                Ok(Some(other)) => {
                    tracing::warn!(
                        "unexpected discovery response from {:?}: {:?}",
                        member,
                        other
                    );
                    continue;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("discovery against {:?} failed: {}", member, e);
                    continue;
                }
            };

            for address in addresses {
                self.registry.join(address.clone(), member.clone());

                let short = Command::GetShortRunningFree {
                    address: address.clone(),
                };
                match self.unicast(channel, short, member).await {
                    Ok(Some(CommandResponse::Free { value })) => {
                        self.capacity.update_short_running(&address, value);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("capacity fetch from {:?} failed: {}", member, e);
                    }
                }

                let long = Command::GetLongRunningFree {
                    address: address.clone(),
                };
                match self.unicast(channel, long, member).await {
                    Ok(Some(CommandResponse::Free { value })) => {
                        self.capacity.update_long_running(&address, value);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("capacity fetch from {:?} failed: {}", member, e);
                    }
                }
            }
        }
    }

    // --- Accessors ---

    pub(crate) fn group(&self) -> &Arc<dyn GroupMembership> {
        &self.group
    }

    pub(crate) fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    pub(crate) fn capacity(&self) -> &CapacityLedger {
        &self.capacity
    }

    pub(crate) fn statistics(&self) -> &StatisticsLedger {
        &self.statistics
    }

    /// Addresses currently believed hosted by `member`.
    pub fn addresses(&self, member: &Member) -> Vec<Address> {
        self.registry.addresses(member)
    }

    /// Short-running free capacity recorded for `address` (zero when unknown).
    pub fn short_running_free(&self, address: &Address) -> i64 {
        self.capacity.short_running(address)
    }

    /// Long-running free capacity recorded for `address` (zero when unknown).
    pub fn long_running_free(&self, address: &Address) -> i64 {
        self.capacity.long_running(address)
    }
}

fn work_error(e: EngineError) -> TransportError {
    match e {
        EngineError::Rejected(message) => TransportError::WorkRejected(message),
        EngineError::Failed(message) => TransportError::WorkFailed(message),
    }
}

#[async_trait]
impl CommandReceiver for TransportCore {
    /// Executes an inbound command as an in-flight operation, so a shutdown
    /// drains inbound work too. Commands arriving once teardown has begun
    /// answer with a failure value immediately instead of half-executing or
    /// queueing behind the teardown.
    async fn receive(&self, command: Command) -> CommandResponse {
        let operation = match self.begin_operation() {
            Ok(operation) => operation,
            Err(e) => {
                return CommandResponse::Err {
                    message: e.to_string(),
                };
            }
        };

        command.execute(self, &operation.channel).await
    }
}

#[async_trait]
impl MembershipListener for TransportCore {
    /// Evicts departed members' addresses, then, when two views merged,
    /// runs full discovery so the registry self-heals without replaying
    /// historical announcements.
    async fn membership_changed(
        &self,
        previous: MembershipView,
        current: MembershipView,
        merged: bool,
    ) {
        let Ok(operation) = self.begin_operation() else {
            return;
        };

        for leaver in previous.departed_since(&current) {
            self.local_leave(&leaver);
        }

        if merged {
            self.reconcile(&operation.channel, &current).await;
        }
    }
}
