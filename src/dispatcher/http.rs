//! HTTP Dispatcher
//!
//! The real inter-node wire: one axum endpoint accepts JSON-encoded command
//! envelopes and routes them to the receiver bound under the envelope's
//! channel name; the client side is a reqwest POST with a per-call timeout.
//! Member addresses are resolved through the gossip membership service, and a
//! request failure against a member that already left the view is reported as
//! `Cancelled` rather than as an error.

use super::{CallOutcome, Channel, CommandDispatcher, CommandReceiver};
use crate::group::GroupMembership;
use crate::group::gossip::GossipMembership;
use crate::group::types::Member;
use crate::protocol::command::{Command, CommandResponse};

use anyhow::Result;
use async_trait::async_trait;
use axum::{Extension, Json, Router, routing::post};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const ENDPOINT_COMMAND: &str = "/internal/command";

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire format for one dispatched command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Logical channel the receiver was bound under.
    pub channel: String,
    pub command: Command,
}

type ReceiverMap = Arc<DashMap<String, Arc<dyn CommandReceiver>>>;

pub struct HttpDispatcher {
    group: Arc<GossipMembership>,
    client: reqwest::Client,
    receivers: ReceiverMap,
}

impl HttpDispatcher {
    /// Binds the command endpoint and starts serving inbound envelopes.
    pub async fn new(group: Arc<GossipMembership>, bind_addr: SocketAddr) -> Result<Arc<Self>> {
        let receivers: ReceiverMap = Arc::new(DashMap::new());

        let app = Router::new()
            .route(ENDPOINT_COMMAND, post(handle_command))
            .layer(Extension(receivers.clone()));

        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("command endpoint terminated: {}", e);
            }
        });

        tracing::info!("command endpoint listening on {}", local_addr);

        Ok(Arc::new(Self {
            group,
            client: reqwest::Client::new(),
            receivers,
        }))
    }
}

async fn handle_command(
    Extension(receivers): Extension<ReceiverMap>,
    Json(envelope): Json<CommandEnvelope>,
) -> Json<CommandResponse> {
    match receivers.get(&envelope.channel) {
        Some(receiver) => Json(receiver.receive(envelope.command).await),
        None => Json(CommandResponse::Err {
            message: format!("no receiver bound for channel '{}'", envelope.channel),
        }),
    }
}

#[async_trait]
impl CommandDispatcher for HttpDispatcher {
    async fn create_channel(
        &self,
        name: &str,
        receiver: Arc<dyn CommandReceiver>,
    ) -> anyhow::Result<Arc<dyn Channel>> {
        self.receivers.insert(name.to_string(), receiver);
        Ok(Arc::new(HttpChannel {
            group: Arc::clone(&self.group),
            client: self.client.clone(),
            receivers: self.receivers.clone(),
            name: name.to_string(),
        }))
    }
}

struct HttpChannel {
    group: Arc<GossipMembership>,
    client: reqwest::Client,
    receivers: ReceiverMap,
    name: String,
}

impl HttpChannel {
    async fn post(&self, command: Command, target: &Member) -> CallOutcome {
        let Some(addr) = self.group.rpc_addr_of(target) else {
            // Target no longer resolvable: it departed, not a failure.
            return CallOutcome::Cancelled;
        };

        let envelope = CommandEnvelope {
            channel: self.name.clone(),
            command,
        };

        let url = format!("http://{}{}", addr, ENDPOINT_COMMAND);
        let sent = self
            .client
            .post(url)
            .json(&envelope)
            .timeout(CALL_TIMEOUT)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                if self.group.current_membership().contains(target) {
                    return CallOutcome::Failed(e.to_string());
                }
                return CallOutcome::Cancelled;
            }
        };

        if !response.status().is_success() {
            return CallOutcome::Failed(format!("command endpoint returned {}", response.status()));
        }

        match response.json::<CommandResponse>().await {
            Ok(decoded) => CallOutcome::Completed(decoded),
            Err(e) => CallOutcome::Failed(format!("undecodable command response: {}", e)),
        }
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn call_one(&self, command: Command, target: &Member) -> CallOutcome {
        self.post(command, target).await
    }

    async fn call_all(&self, command: Command) -> Vec<(Member, CallOutcome)> {
        let local = self.group.local_member();
        let targets: Vec<Member> = self
            .group
            .current_membership()
            .members
            .into_iter()
            .filter(|member| member != &local)
            .collect();

        let calls = targets.into_iter().map(|target| {
            let command = command.clone();
            async move {
                let outcome = self.post(command, &target).await;
                (target, outcome)
            }
        });

        join_all(calls).await
    }

    async fn close(&self) {
        self.receivers.remove(&self.name);
    }
}
