//! Command Catalog and Execution Contracts
//!
//! One enum variant per operation. Broadcast commands (add/remove/update)
//! mutate the receiver's ledgers; unicast commands either read receiver state
//! or submit work to the receiver's engine. `Join` and `Leave` drive
//! membership reconciliation over the same dispatch path as everything else.

use crate::dispatcher::Channel;
use crate::engine::types::{EngineError, WorkItem};
use crate::group::types::Member;
use crate::state::statistics::{DeltaKind, DistributedStatistics};
use crate::transport::core::TransportCore;
use crate::transport::types::Address;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Liveness check; answered with the receiver's receipt timestamp.
    Ping,

    /// Announces that `member` hosts `address`. Carries both so the receiver
    /// can associate them atomically; the sender follows up with capacity
    /// updates once the add has landed.
    AddWorkManager { address: Address, member: Member },

    /// Withdraws an address previously announced by the sender.
    RemoveWorkManager { address: Address },

    GetShortRunningFree { address: Address },
    GetLongRunningFree { address: Address },
    UpdateShortRunningFree { address: Address, free: i64 },
    UpdateLongRunningFree { address: Address, free: i64 },

    /// Executes the carried work on the receiver, blocking until completion.
    DoWork { address: Address, work: WorkItem },
    /// Starts the carried work on the receiver, replying once it is running.
    StartWork { address: Address, work: WorkItem },
    /// Queues the carried work on the receiver and replies immediately.
    ScheduleWork { address: Address, work: WorkItem },

    DeltaDoWorkAccepted { address: Address },
    DeltaDoWorkRejected { address: Address },
    DeltaStartWorkAccepted { address: Address },
    DeltaStartWorkRejected { address: Address },
    DeltaScheduleWorkAccepted { address: Address },
    DeltaScheduleWorkRejected { address: Address },
    DeltaWorkSuccessful { address: Address },
    DeltaWorkFailed { address: Address },

    GetDistributedStatistics { address: Address },
    ClearDistributedStatistics { address: Address },

    /// Join discovery: asks the receiver for every address it hosts itself.
    GetWorkManagers,

    /// Announces a new transport; the receiver re-runs reconciliation against
    /// its current view (fetching the joiner's addresses in the process).
    Join,

    /// Graceful departure: the receiver evicts every address of `member`.
    Leave { member: Member },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResponse {
    Ack,
    Pong { received_at_ms: u64 },
    Free { value: i64 },
    Started { start_millis: u64 },
    WorkManagers { addresses: Vec<Address> },
    Statistics { statistics: DistributedStatistics },
    /// Execution failure, returned as a value rather than thrown across the
    /// wire; the calling transport translates it into a local error.
    Err { message: String },
}

impl Command {
    /// Builds the delta command reporting `kind` for `address`.
    pub fn for_delta(address: Address, kind: DeltaKind) -> Command {
        match kind {
            DeltaKind::DoWorkAccepted => Command::DeltaDoWorkAccepted { address },
            DeltaKind::DoWorkRejected => Command::DeltaDoWorkRejected { address },
            DeltaKind::StartWorkAccepted => Command::DeltaStartWorkAccepted { address },
            DeltaKind::StartWorkRejected => Command::DeltaStartWorkRejected { address },
            DeltaKind::ScheduleWorkAccepted => Command::DeltaScheduleWorkAccepted { address },
            DeltaKind::ScheduleWorkRejected => Command::DeltaScheduleWorkRejected { address },
            DeltaKind::WorkSuccessful => Command::DeltaWorkSuccessful { address },
            DeltaKind::WorkFailed => Command::DeltaWorkFailed { address },
        }
    }

    /// Executes this command against the receiving node.
    ///
    /// `channel` is the receiver's own dispatch channel, needed by commands
    /// that trigger follow-up calls (reconciliation after `Join`). Failures
    /// are folded into `CommandResponse::Err` so they travel back as the RPC
    /// result's failure value.
    pub async fn execute(
        self,
        transport: &TransportCore,
        channel: &Arc<dyn Channel>,
    ) -> CommandResponse {
        match self {
            Command::Ping => CommandResponse::Pong {
                received_at_ms: now_ms(),
            },

            Command::AddWorkManager { address, member } => {
                transport.local_join(address, member);
                CommandResponse::Ack
            }

            Command::RemoveWorkManager { address } => {
                transport.local_remove(&address);
                CommandResponse::Ack
            }

            Command::GetShortRunningFree { address } => CommandResponse::Free {
                value: transport.capacity().short_running(&address),
            },

            Command::GetLongRunningFree { address } => CommandResponse::Free {
                value: transport.capacity().long_running(&address),
            },

            Command::UpdateShortRunningFree { address, free } => {
                transport.capacity().update_short_running(&address, free);
                CommandResponse::Ack
            }

            Command::UpdateLongRunningFree { address, free } => {
                transport.capacity().update_long_running(&address, free);
                CommandResponse::Ack
            }

            Command::DoWork { address, work } => {
                match transport.execute_do_work(&address, work).await {
                    Ok(()) => CommandResponse::Ack,
                    Err(e) => failure(e),
                }
            }

            Command::StartWork { address, work } => {
                match transport.execute_start_work(&address, work).await {
                    Ok(start_millis) => CommandResponse::Started { start_millis },
                    Err(e) => failure(e),
                }
            }

            Command::ScheduleWork { address, work } => {
                match transport.execute_schedule_work(&address, work).await {
                    Ok(()) => CommandResponse::Ack,
                    Err(e) => failure(e),
                }
            }

            Command::DeltaDoWorkAccepted { address } => {
                delta(transport, &address, DeltaKind::DoWorkAccepted)
            }
            Command::DeltaDoWorkRejected { address } => {
                delta(transport, &address, DeltaKind::DoWorkRejected)
            }
            Command::DeltaStartWorkAccepted { address } => {
                delta(transport, &address, DeltaKind::StartWorkAccepted)
            }
            Command::DeltaStartWorkRejected { address } => {
                delta(transport, &address, DeltaKind::StartWorkRejected)
            }
            Command::DeltaScheduleWorkAccepted { address } => {
                delta(transport, &address, DeltaKind::ScheduleWorkAccepted)
            }
            Command::DeltaScheduleWorkRejected { address } => {
                delta(transport, &address, DeltaKind::ScheduleWorkRejected)
            }
            Command::DeltaWorkSuccessful { address } => {
                delta(transport, &address, DeltaKind::WorkSuccessful)
            }
            Command::DeltaWorkFailed { address } => {
                delta(transport, &address, DeltaKind::WorkFailed)
            }

            Command::GetDistributedStatistics { address } => CommandResponse::Statistics {
                statistics: transport.statistics().snapshot(&address),
            },

            Command::ClearDistributedStatistics { address } => {
                transport.statistics().clear(&address);
                CommandResponse::Ack
            }

            Command::GetWorkManagers => CommandResponse::WorkManagers {
                addresses: transport.local_addresses(),
            },

            Command::Join => {
                let view = transport.group().current_membership();
                transport.reconcile(channel, &view).await;
                CommandResponse::Ack
            }

            Command::Leave { member } => {
                transport.local_leave(&member);
                CommandResponse::Ack
            }
        }
    }
}

fn delta(transport: &TransportCore, address: &Address, kind: DeltaKind) -> CommandResponse {
    transport.statistics().delta(address, kind);
    CommandResponse::Ack
}

fn failure(e: EngineError) -> CommandResponse {
    CommandResponse::Err {
        message: e.to_string(),
    }
}

/// Current system time in milliseconds, used as the ping receipt token.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
