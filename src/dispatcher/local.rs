//! In-Memory Mesh Dispatcher
//!
//! Routes commands between transports sharing one `LocalCluster`. Calls to a
//! member with no bound receiver, or to a member outside the caller's
//! partition, resolve to `Cancelled`, the same thing a real dispatcher
//! reports when the target leaves the view mid-call.

use super::{CallOutcome, Channel, CommandDispatcher, CommandReceiver};
use crate::group::local::LocalCluster;
use crate::group::types::Member;
use crate::protocol::command::Command;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

pub struct LocalDispatcher {
    cluster: Arc<LocalCluster>,
    member: Member,
}

impl LocalDispatcher {
    pub fn new(cluster: Arc<LocalCluster>, member: Member) -> Arc<Self> {
        Arc::new(Self { cluster, member })
    }
}

#[async_trait]
impl CommandDispatcher for LocalDispatcher {
    async fn create_channel(
        &self,
        name: &str,
        receiver: Arc<dyn CommandReceiver>,
    ) -> anyhow::Result<Arc<dyn Channel>> {
        self.cluster
            .bind_receiver(self.member.clone(), name.to_string(), receiver);
        Ok(Arc::new(LocalChannel {
            cluster: Arc::clone(&self.cluster),
            member: self.member.clone(),
            name: name.to_string(),
        }))
    }
}

struct LocalChannel {
    cluster: Arc<LocalCluster>,
    member: Member,
    name: String,
}

#[async_trait]
impl Channel for LocalChannel {
    async fn call_one(&self, command: Command, target: &Member) -> CallOutcome {
        if !self.cluster.same_partition(&self.member, target) {
            return CallOutcome::Cancelled;
        }
        match self.cluster.receiver(target, &self.name) {
            Some(receiver) => CallOutcome::Completed(receiver.receive(command).await),
            None => CallOutcome::Cancelled,
        }
    }

    async fn call_all(&self, command: Command) -> Vec<(Member, CallOutcome)> {
        let targets: Vec<Member> = self
            .cluster
            .view_seen_by(&self.member)
            .members
            .into_iter()
            .filter(|member| member != &self.member)
            .collect();

        let calls = targets.into_iter().map(|target| {
            let command = command.clone();
            async move {
                let outcome = self.call_one(command, &target).await;
                (target, outcome)
            }
        });

        join_all(calls).await
    }

    async fn close(&self) {
        self.cluster.unbind_receiver(&self.member, &self.name);
    }
}
