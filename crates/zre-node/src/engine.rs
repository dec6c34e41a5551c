//! The node reactor.
//!
//! One task owns every table: peers, peer groups, own groups, own headers.
//! It multiplexes application commands, inbox messages, beacons, companion
//! frames and the beacon tick, and handles each to completion before taking
//! the next. Nothing here locks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use zre_core::config::NodeConfig;
use zre_core::{Beacon, Message, NodeIdentity};

use crate::beacon::BeaconSocket;
use crate::companion::Companion;
use crate::event::{Command, Event, Query};
use crate::group::Group;
use crate::peer::{Liveness, Peer};
use crate::transport::{Connector, Frames, Inbound, Inbox};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub(crate) beacon_interval: Duration,
    pub(crate) liveness: Liveness,
    pub(crate) ping_every_tick: bool,
    pub(crate) queue_depth: usize,
}

impl Settings {
    pub(crate) fn from_config(config: &NodeConfig) -> Self {
        Self {
            beacon_interval: config.timing.beacon_interval(),
            liveness: Liveness {
                evasive: config.timing.peer_evasive(),
                expired: config.timing.peer_expired(),
            },
            ping_every_tick: config.timing.ping_every_tick,
            queue_depth: config.mailbox.queue_depth,
        }
    }
}

pub(crate) struct Engine {
    identity: NodeIdentity,
    host: Ipv4Addr,
    port: u16,
    status: u8,
    peers: HashMap<NodeIdentity, Peer>,
    peer_groups: HashMap<String, Group>,
    own_groups: BTreeSet<String>,
    headers: BTreeMap<String, String>,
    settings: Settings,
    connector: Box<dyn Connector>,
    companions: Vec<Box<dyn Companion>>,
    events: mpsc::UnboundedSender<Event>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: NodeIdentity,
        host: Ipv4Addr,
        port: u16,
        settings: Settings,
        headers: BTreeMap<String, String>,
        connector: Box<dyn Connector>,
        companions: Vec<Box<dyn Companion>>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            identity,
            host,
            port,
            status: 0,
            peers: HashMap::new(),
            peer_groups: HashMap::new(),
            own_groups: BTreeSet::new(),
            headers,
            settings,
            connector,
            companions,
            events,
        }
    }

    pub(crate) fn beacon(&self) -> Beacon {
        Beacon::new(self.identity, self.port)
    }

    fn hello(&self) -> Message {
        Message::Hello {
            sequence: 0,
            ipaddress: self.host.to_string(),
            mailbox: self.port,
            groups: self.own_groups.iter().cloned().collect(),
            status: self.status,
            headers: self.headers.clone(),
        }
    }

    // ── Peers ─────────────────────────────────────────────────────────────────

    /// Make sure `identity` is a known, connected peer. A new peer gets a
    /// mailbox and our HELLO, and the application gets ENTER. A known peer
    /// whose mailbox was dropped gets a fresh mailbox and HELLO, but no ENTER.
    fn require_peer(&mut self, identity: NodeIdentity, address: &str, port: u16, now: Instant) {
        if self.peers.get(&identity).is_some_and(Peer::is_connected) {
            return;
        }
        let endpoint = format!("{address}:{port}");
        self.purge_endpoint(&endpoint);

        let hello = self.hello();
        if let Some(peer) = self.peers.get_mut(&identity) {
            peer.connect(
                self.identity,
                &endpoint,
                self.connector.as_mut(),
                self.settings.queue_depth,
            );
            peer.send(hello);
            tracing::debug!(peer = %identity, %endpoint, "peer reconnected");
            return;
        }

        let mut peer = Peer::new(identity, self.settings.liveness, now);
        peer.connect(
            self.identity,
            &endpoint,
            self.connector.as_mut(),
            self.settings.queue_depth,
        );
        peer.send(hello);

        tracing::info!(event = "ENTER", peer = %identity, %endpoint, "peer entered");
        emit(&self.events, Event::Enter { peer: identity });
        self.peers.insert(identity, peer);
    }

    /// A restarted node can come back on the same endpoint under a new
    /// identity. Whoever held the endpoint before is disconnected and left
    /// for the sweep to expire.
    fn purge_endpoint(&mut self, endpoint: &str) {
        for peer in self.peers.values_mut() {
            if peer.endpoint() == Some(endpoint) {
                tracing::debug!(peer = %peer.identity(), endpoint, "endpoint reused, disconnecting stale peer");
                peer.disconnect();
            }
        }
    }

    pub(crate) fn handle_beacon(&mut self, beacon: Beacon, from: Ipv4Addr, now: Instant) {
        if beacon.identity == self.identity {
            return;
        }
        self.require_peer(beacon.identity, &from.to_string(), beacon.port, now);
        if let Some(peer) = self.peers.get_mut(&beacon.identity) {
            peer.refresh(now);
        }
    }

    pub(crate) fn handle_inbound(&mut self, inbound: Inbound, now: Instant) {
        let Inbound { sender, frames } = inbound;
        let msg = match Message::decode(&frames) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!(peer = %sender, "no protocol frame in message, ignoring");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %sender, error = %e, "malformed message, ignoring");
                return;
            }
        };

        if let Message::Hello {
            ipaddress, mailbox, ..
        } = &msg
        {
            self.require_peer(sender, ipaddress, *mailbox, now);
            if let Some(peer) = self.peers.get_mut(&sender) {
                peer.set_ready(true);
            }
        }

        let Some(peer) = self.peers.get_mut(&sender) else {
            tracing::debug!(peer = %sender, kind = msg.kind().name(), "message from unknown peer");
            return;
        };
        if !peer.is_ready() {
            tracing::debug!(peer = %sender, kind = msg.kind().name(), "peer not ready, ignoring");
            return;
        }
        if !peer.check_sequence(&msg) {
            tracing::warn!(
                peer = %sender,
                kind = msg.kind().name(),
                sequence = msg.sequence(),
                expected = peer.want_sequence().wrapping_add(1),
                "lost messages from peer"
            );
        }

        match msg {
            Message::Hello {
                groups,
                status,
                headers,
                ..
            } => {
                for name in &groups {
                    join_peer_group(&mut self.peer_groups, &self.events, peer, name);
                }
                peer.set_status(status);
                for companion in self.companions.iter_mut() {
                    if let Some(endpoint) = headers.get(companion.header_key()) {
                        tracing::info!(
                            peer = %sender,
                            header = companion.header_key(),
                            %endpoint,
                            "connecting companion"
                        );
                        companion.connect(endpoint);
                    }
                }
                peer.set_headers(headers);
            }
            Message::Whisper { content, .. } => {
                emit(&self.events, Event::Whisper { peer: sender, content });
            }
            Message::Shout { group, content, .. } => {
                emit(
                    &self.events,
                    Event::Shout {
                        peer: sender,
                        group,
                        content,
                    },
                );
            }
            Message::Ping { .. } => {
                peer.send(Message::PingOk { sequence: 0 });
            }
            Message::PingOk { .. } => {}
            Message::Join { group, status, .. } => {
                join_peer_group(&mut self.peer_groups, &self.events, peer, &group);
                check_status(peer, status);
            }
            Message::Leave { group, status, .. } => {
                leave_peer_group(&mut self.peer_groups, &self.events, peer, &group);
                check_status(peer, status);
            }
        }
        peer.refresh(now);
    }

    pub(crate) fn forward_companion(&self, frames: Frames) {
        emit(&self.events, Event::Companion { frames });
    }

    /// Expire silent peers and ping evasive ones.
    pub(crate) fn sweep(&mut self, now: Instant) {
        let expired: Vec<NodeIdentity> = self
            .peers
            .values()
            .filter(|p| p.is_expired(now))
            .map(Peer::identity)
            .collect();
        for identity in expired {
            let Some(mut peer) = self.peers.remove(&identity) else {
                continue;
            };
            tracing::info!(event = "EXIT", peer = %identity, "peer expired");
            emit(&self.events, Event::Exit { peer: identity });
            for group in self.peer_groups.values_mut() {
                if group.contains(&identity) {
                    group.leave(&mut peer);
                }
            }
        }

        let every_tick = self.settings.ping_every_tick;
        for peer in self.peers.values_mut() {
            if peer.is_evasive(now) && (every_tick || !peer.pinged()) {
                tracing::debug!(peer = %peer.identity(), "peer evasive, pinging");
                peer.send(Message::Ping { sequence: 0 });
                peer.mark_pinged();
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub(crate) fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Join(group) => self.join(group),
            Command::Leave(group) => self.leave(group),
            Command::Whisper { peer, content } => match self.peers.get_mut(&peer) {
                Some(p) => {
                    p.send(Message::Whisper {
                        sequence: 0,
                        content,
                    });
                }
                None => tracing::debug!(%peer, "whisper to unknown peer dropped"),
            },
            Command::Shout { group, content } => match self.peer_groups.get(&group) {
                Some(members) => {
                    let msg = Message::Shout {
                        sequence: 0,
                        group,
                        content,
                    };
                    members.send(&mut self.peers, &msg);
                }
                None => tracing::debug!(%group, "shout to group with no known members"),
            },
            Command::Set { key, value } => {
                self.headers.insert(key, value);
            }
            Command::Query(query) => self.answer(query),
            Command::Stop => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn join(&mut self, group: String) {
        if self.own_groups.contains(&group) {
            return;
        }
        self.own_groups.insert(group.clone());
        self.status = self.status.wrapping_add(1);
        tracing::info!(event = "JOIN", %group, status = self.status, "joined group");
        self.broadcast(Message::Join {
            sequence: 0,
            group,
            status: self.status,
        });
    }

    fn leave(&mut self, group: String) {
        if !self.own_groups.remove(&group) {
            return;
        }
        self.status = self.status.wrapping_add(1);
        tracing::info!(event = "LEAVE", %group, status = self.status, "left group");
        self.broadcast(Message::Leave {
            sequence: 0,
            group,
            status: self.status,
        });
    }

    fn broadcast(&mut self, msg: Message) {
        for peer in self.peers.values_mut() {
            peer.send(msg.clone());
        }
    }

    fn answer(&self, query: Query) {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match query {
            Query::Peers(reply) => {
                let mut peers: Vec<NodeIdentity> = self.peers.keys().copied().collect();
                peers.sort();
                let _ = reply.send(peers);
            }
            Query::PeerHeader { peer, key, reply } => {
                let value = self
                    .peers
                    .get(&peer)
                    .and_then(|p| p.header(&key))
                    .map(str::to_string);
                let _ = reply.send(value);
            }
            Query::OwnGroups(reply) => {
                let _ = reply.send(self.own_groups.iter().cloned().collect());
            }
            Query::PeerGroups(reply) => {
                let mut names: Vec<String> = self.peer_groups.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        tracing::info!(peers = self.peers.len(), "node stopping");
        self.peers.clear();
        self.peer_groups.clear();
    }
}

fn emit(events: &mpsc::UnboundedSender<Event>, event: Event) {
    // The application may have dropped its receiver; events are then discarded.
    let _ = events.send(event);
}

fn join_peer_group(
    groups: &mut HashMap<String, Group>,
    events: &mpsc::UnboundedSender<Event>,
    peer: &mut Peer,
    name: &str,
) {
    let group = groups
        .entry(name.to_string())
        .or_insert_with(|| Group::new(name));
    group.join(peer);
    tracing::info!(event = "JOIN", peer = %peer.identity(), group = name, "peer joined group");
    emit(
        events,
        Event::Join {
            peer: peer.identity(),
            group: name.to_string(),
        },
    );
}

fn leave_peer_group(
    groups: &mut HashMap<String, Group>,
    events: &mpsc::UnboundedSender<Event>,
    peer: &mut Peer,
    name: &str,
) {
    let group = groups
        .entry(name.to_string())
        .or_insert_with(|| Group::new(name));
    group.leave(peer);
    tracing::info!(event = "LEAVE", peer = %peer.identity(), group = name, "peer left group");
    emit(
        events,
        Event::Leave {
            peer: peer.identity(),
            group: name.to_string(),
        },
    );
}

/// After a JOIN or LEAVE our count of the peer's changes should equal the
/// status it reported. If not, a change was missed; take the peer's word.
fn check_status(peer: &mut Peer, reported: u8) {
    if peer.status() != reported {
        tracing::warn!(
            peer = %peer.identity(),
            local = peer.status(),
            reported,
            "peer status out of step"
        );
        peer.set_status(reported);
    }
}

// ── Reactor ───────────────────────────────────────────────────────────────────

pub(crate) struct Sources {
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) inbox: Inbox,
    pub(crate) inbound: mpsc::Receiver<Inbound>,
    pub(crate) beacon: BeaconSocket,
    pub(crate) companion: Option<mpsc::UnboundedReceiver<Frames>>,
}

async fn next_companion(rx: &mut Option<mpsc::UnboundedReceiver<Frames>>) -> Option<Frames> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run until `Command::Stop` or until every command sender is dropped.
pub(crate) async fn run(mut engine: Engine, mut sources: Sources) {
    let interval = engine.settings.beacon_interval;
    let mut ping_at = Instant::now();
    tracing::debug!(inbox_port = sources.inbox.port(), "reactor running");

    loop {
        tokio::select! {
            command = sources.commands.recv() => match command {
                Some(command) => {
                    if engine.handle_command(command).is_break() {
                        break;
                    }
                }
                None => {
                    tracing::debug!("all node handles dropped");
                    break;
                }
            },

            Some(inbound) = sources.inbound.recv() => {
                engine.handle_inbound(inbound, Instant::now());
            }

            ready = sources.beacon.readable() => match ready {
                Ok(()) => {
                    if let Some((beacon, from)) = sources.beacon.poll() {
                        engine.handle_beacon(beacon, from, Instant::now());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "beacon socket not readable"),
            },

            frames = next_companion(&mut sources.companion) => match frames {
                Some(frames) => engine.forward_companion(frames),
                None => {
                    tracing::debug!("companion channel closed");
                    sources.companion = None;
                }
            },

            _ = time::sleep_until(ping_at) => {}
        }

        let now = Instant::now();
        if now >= ping_at {
            if let Err(e) = sources.beacon.announce(&engine.beacon()).await {
                tracing::warn!(error = %e, "beacon send failed");
            }
            ping_at = now + interval;
            engine.sweep(now);
        }
    }

    engine.shutdown();
}
