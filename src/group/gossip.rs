//! Gossip Membership Provider
//!
//! A UDP-based, SWIM-like membership service. Nodes periodically ping a random
//! alive peer; acks carry the sender's full member list, which is merged using
//! incarnation numbers to resolve conflicting claims. Unresponsive members
//! transition Alive -> Suspect -> Dead; a suspected node refutes by bumping its
//! own incarnation.
//!
//! View semantics for the transport: the view contains every member not yet
//! declared Dead. Gossip cannot distinguish a first contact from a healed
//! partition, so any view change that *adds* members is reported with
//! `merged = true`; reconciliation is idempotent, which makes the conservative
//! flag safe.

use super::types::{Member, MembershipView};
use super::{GroupMembership, MembershipListener, Registration};

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// One cluster node as tracked by gossip.
///
/// `incarnation` is a logical clock used to order state claims; a node refutes
/// a false Suspect claim by re-announcing itself with a higher incarnation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipNode {
    pub member: Member,
    pub gossip_addr: SocketAddr,
    /// Where this node's command dispatcher listens; resolved by the HTTP
    /// dispatcher when sending unicasts.
    pub rpc_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// The gossip wire protocol, bincode-encoded over UDP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: Member,
        incarnation: u64,
    },

    Ack {
        from: Member,
        incarnation: u64,
        members: Vec<GossipNode>,
    },

    Join {
        node: GossipNode,
    },

    Suspect {
        member: Member,
        incarnation: u64,
    },

    Alive {
        member: Member,
        incarnation: u64,
    },
}

/// One observed view transition, queued for in-order listener delivery.
struct ViewChange {
    previous: MembershipView,
    current: MembershipView,
    merged: bool,
}

pub struct GossipMembership {
    local: GossipNode,
    members: DashMap<Member, GossipNode>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    listeners: Arc<DashMap<u64, Arc<dyn MembershipListener>>>,
    listener_seq: AtomicU64,
    changes: mpsc::UnboundedSender<ViewChange>,
}

impl GossipMembership {
    /// Binds the gossip socket and announces the new node to the seeds.
    pub async fn new(
        bind_addr: SocketAddr,
        rpc_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let gossip_addr = socket.local_addr()?;
        let local = GossipNode {
            member: Member::new(),
            gossip_addr,
            rpc_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };

        let members = DashMap::new();
        members.insert(local.member.clone(), local.clone());

        if !seed_nodes.is_empty() {
            tracing::info!("joining cluster via {} seed node(s)", seed_nodes.len());
            let join = GossipMessage::Join { node: local.clone() };
            let encoded = bincode::serialize(&join)?;
            for seed in &seed_nodes {
                socket.send_to(&encoded, seed).await?;
            }
        }

        let listeners: Arc<DashMap<u64, Arc<dyn MembershipListener>>> = Arc::new(DashMap::new());

        // All view changes funnel through one delivery task so listeners see
        // them in the order the view moved through them. Listener callbacks do
        // network work and must not stall the receive loop, hence the queue.
        let (changes, mut change_rx) = mpsc::unbounded_channel::<ViewChange>();
        let delivery = Arc::clone(&listeners);
        tokio::spawn(async move {
            while let Some(change) = change_rx.recv().await {
                let targets: Vec<Arc<dyn MembershipListener>> =
                    delivery.iter().map(|entry| entry.value().clone()).collect();
                for listener in targets {
                    listener
                        .membership_changed(
                            change.previous.clone(),
                            change.current.clone(),
                            change.merged,
                        )
                        .await;
                }
            }
        });

        Ok(Arc::new(Self {
            local,
            members,
            socket: Arc::new(socket),
            incarnation: Arc::new(RwLock::new(1)),
            listeners,
            listener_seq: AtomicU64::new(0),
            changes,
        }))
    }

    /// Spawns the gossip, receive and failure-detection loops.
    pub async fn start(self: Arc<Self>) {
        let gossip = self.clone();
        tokio::spawn(async move {
            gossip.gossip_loop().await;
        });

        let receive = self.clone();
        tokio::spawn(async move {
            receive.receive_loop().await;
        });

        let detect = self.clone();
        tokio::spawn(async move {
            detect.failure_detection_loop().await;
        });

        tracing::info!(
            "gossip membership started as {:?} on {}",
            self.local.member,
            self.local.gossip_addr
        );
    }

    /// The UDP address the gossip socket actually bound to.
    pub fn gossip_addr(&self) -> SocketAddr {
        self.local.gossip_addr
    }

    /// Resolves the dispatcher address of a member still in the view.
    pub fn rpc_addr_of(&self, member: &Member) -> Option<SocketAddr> {
        self.members
            .get(member)
            .filter(|node| node.state != NodeState::Dead)
            .map(|node| node.rpc_addr)
    }

    fn view(&self) -> MembershipView {
        MembershipView::new(
            self.members
                .iter()
                .filter(|entry| entry.value().state != NodeState::Dead)
                .map(|entry| entry.key().clone())
                .collect(),
        )
    }

    /// Compares the view against `previous` and, if it changed, queues the
    /// change for the delivery task.
    fn notify_if_changed(&self, previous: MembershipView, merged: bool) {
        let current = self.view();
        if current == previous {
            return;
        }
        let _ = self.changes.send(ViewChange {
            previous,
            current,
            merged,
        });
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let alive: Vec<GossipNode> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.key() != &self.local.member && entry.value().state == NodeState::Alive
                })
                .map(|entry| entry.value().clone())
                .collect();

            if alive.is_empty() {
                continue;
            }

            use rand::Rng;
            let target = &alive[rand::thread_rng().gen_range(0..alive.len())];

            let incarnation = *self.incarnation.read().await;
            let ping = GossipMessage::Ping {
                from: self.local.member.clone(),
                incarnation,
            };

            if let Ok(encoded) = bincode::serialize(&ping)
                && let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await
            {
                tracing::warn!("failed to ping {:?}: {}", target.member, e);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(message) => {
                        if let Err(e) = self.handle_message(message, src).await {
                            tracing::error!("error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("undecodable gossip datagram from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("failed to receive gossip datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: GossipMessage, src: SocketAddr) -> Result<()> {
        match message {
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation).await?;
            }
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members);
            }
            GossipMessage::Join { node } => {
                self.handle_join(node);
            }
            GossipMessage::Suspect {
                member,
                incarnation,
            } => {
                self.handle_suspect(member, incarnation, src).await;
            }
            GossipMessage::Alive {
                member,
                incarnation,
            } => {
                self.handle_alive(member, incarnation);
            }
        }

        Ok(())
    }

    async fn handle_ping(&self, from: Member, from_incarnation: u64) -> Result<()> {
        if let Some(mut node) = self.members.get_mut(&from) {
            node.last_seen = Some(Instant::now());
            if from_incarnation > node.incarnation {
                node.incarnation = from_incarnation;
            }
        }

        let Some(reply_to) = self.members.get(&from).map(|node| node.gossip_addr) else {
            // Unknown pinger: we cannot reply without its address; it will
            // reach us through a Join or an Ack merge eventually.
            tracing::debug!("ping from unknown member {:?}", from);
            return Ok(());
        };

        let all: Vec<GossipNode> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let incarnation = *self.incarnation.read().await;
        let ack = GossipMessage::Ack {
            from: self.local.member.clone(),
            incarnation,
            members: all,
        };

        let encoded = bincode::serialize(&ack)?;
        self.socket.send_to(&encoded, reply_to).await?;

        Ok(())
    }

    fn handle_ack(&self, from: Member, from_incarnation: u64, members: Vec<GossipNode>) {
        let previous = self.view();

        if let Some(mut node) = self.members.get_mut(&from)
            && from_incarnation > node.incarnation
        {
            node.incarnation = from_incarnation;
            node.last_seen = Some(Instant::now());
        }

        for node in members {
            self.merge_node(node);
        }

        // An ack merge is where healed partitions become visible again, hence
        // the merged flag on any resulting view change.
        self.notify_if_changed(previous, true);
    }

    fn merge_node(&self, incoming: GossipNode) {
        if incoming.member == self.local.member {
            return;
        }

        match self.members.get_mut(&incoming.member) {
            Some(mut existing) => {
                if incoming.incarnation > existing.incarnation {
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::info!(
                    "discovered member {:?} at {}",
                    incoming.member,
                    incoming.gossip_addr
                );
                let mut node = incoming;
                node.last_seen = Some(Instant::now());
                self.members.insert(node.member.clone(), node);
            }
        }
    }

    fn handle_join(&self, mut node: GossipNode) {
        tracing::info!(
            "member {:?} joining cluster from {}",
            node.member,
            node.gossip_addr
        );

        let previous = self.view();
        node.last_seen = Some(Instant::now());
        self.members.insert(node.member.clone(), node);
        self.notify_if_changed(previous, true);
    }

    async fn handle_suspect(&self, member: Member, incarnation: u64, src: SocketAddr) {
        if member == self.local.member {
            // Refute: bump our incarnation and re-announce.
            let refuted = {
                let mut inc = self.incarnation.write().await;
                *inc += 1;
                *inc
            };

            tracing::info!("refuting suspicion with incarnation {}", refuted);
            let alive = GossipMessage::Alive {
                member: self.local.member.clone(),
                incarnation: refuted,
            };
            if let Ok(encoded) = bincode::serialize(&alive) {
                let _ = self.socket.send_to(&encoded, src).await;
                self.broadcast_datagram(&encoded).await;
            }
            return;
        }

        if let Some(mut node) = self.members.get_mut(&member)
            && incarnation >= node.incarnation
            && node.state == NodeState::Alive
        {
            tracing::info!("member {:?} suspected", member);
            node.state = NodeState::Suspect;
            node.incarnation = incarnation;
        }
    }

    fn handle_alive(&self, member: Member, incarnation: u64) {
        let previous = self.view();

        if let Some(mut node) = self.members.get_mut(&member) {
            if incarnation > node.incarnation
                || (incarnation == node.incarnation && node.state == NodeState::Suspect)
            {
                tracing::info!("member {:?} alive again (inc={})", member, incarnation);
                node.state = NodeState::Alive;
                node.incarnation = incarnation;
                node.last_seen = Some(Instant::now());
            }
        }

        // A previously-Dead member coming back is a partition heal.
        self.notify_if_changed(previous, true);
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let previous = self.view();

            let mut suspicions = Vec::new();

            for mut entry in self.members.iter_mut() {
                let node = entry.value_mut();

                if node.member == self.local.member {
                    continue;
                }

                let Some(last_seen) = node.last_seen else {
                    node.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match node.state {
                    NodeState::Alive => {
                        if elapsed > SUSPECT_TIMEOUT {
                            tracing::warn!(
                                "member {:?} suspected (silent for {:?})",
                                node.member,
                                elapsed
                            );
                            node.state = NodeState::Suspect;
                            suspicions.push(GossipMessage::Suspect {
                                member: node.member.clone(),
                                incarnation: node.incarnation,
                            });
                        }
                    }
                    NodeState::Suspect => {
                        if elapsed > DEAD_TIMEOUT {
                            tracing::warn!(
                                "member {:?} declared dead (silent for {:?})",
                                node.member,
                                elapsed
                            );
                            node.state = NodeState::Dead;
                        }
                    }
                    NodeState::Dead => {}
                }
            }

            for suspicion in suspicions {
                if let Ok(encoded) = bincode::serialize(&suspicion) {
                    self.broadcast_datagram(&encoded).await;
                }
            }

            // Dead transitions shrink the view; no additions happen here.
            self.notify_if_changed(previous, false);
        }
    }

    async fn broadcast_datagram(&self, encoded: &[u8]) {
        for entry in self.members.iter() {
            let node = entry.value();
            if node.member == self.local.member || node.state == NodeState::Dead {
                continue;
            }
            if let Err(e) = self.socket.send_to(encoded, node.gossip_addr).await {
                tracing::warn!("failed to gossip to {:?}: {}", node.member, e);
            }
        }
    }
}

impl GroupMembership for GossipMembership {
    fn local_member(&self) -> Member {
        self.local.member.clone()
    }

    fn current_membership(&self) -> MembershipView {
        self.view()
    }

    fn register(&self, listener: Arc<dyn MembershipListener>) -> anyhow::Result<Registration> {
        let id = self.listener_seq.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, listener);

        let listeners = Arc::clone(&self.listeners);
        Ok(Registration::new(move || {
            listeners.remove(&id);
        }))
    }
}
