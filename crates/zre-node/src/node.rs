//! Application-facing handle to a running node.

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use zre_core::config::NodeConfig;
use zre_core::msg::MAX_STRING;
use zre_core::NodeIdentity;

use crate::beacon::BeaconSocket;
use crate::companion::Companion;
use crate::engine::{self, Engine, Settings, Sources};
use crate::event::{Command, Event, Query};
use crate::iface;
use crate::transport::{Connector, Frames, Inbox, TcpConnector};
use crate::NodeError;

/// Inbox messages buffered between the connection readers and the reactor.
const INBOUND_DEPTH: usize = 1024;

/// Configures and starts a [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    connector: Box<dyn Connector>,
    companions: Vec<Box<dyn Companion>>,
    companion_events: Option<mpsc::UnboundedReceiver<Frames>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            connector: Box::new(TcpConnector),
            companions: Vec::new(),
            companion_events: None,
        }
    }

    /// Replace how mailboxes to peers are opened.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    pub fn companion(mut self, companion: impl Companion + 'static) -> Self {
        self.companions.push(Box::new(companion));
        self
    }

    /// Frames arriving here are delivered to the application as
    /// [`Event::Companion`].
    pub fn companion_events(mut self, rx: mpsc::UnboundedReceiver<Frames>) -> Self {
        self.companion_events = Some(rx);
        self
    }

    /// Bind sockets, spawn the reactor, and join the configured groups.
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> Result<Node, NodeError> {
        let config = self.config;
        config.validate()?;
        for (key, value) in &config.node.headers {
            check_header(key, value)?;
        }
        for group in &config.node.groups {
            check_len("group name", group)?;
        }

        let network = &config.network;
        let host = iface::resolve_host(network)?;
        let broadcast: Ipv4Addr = network
            .broadcast_addr
            .parse()
            .map_err(|_| NodeError::InvalidAddress(network.broadcast_addr.clone()))?;
        let beacon = BeaconSocket::bind(
            network.discovery_port,
            SocketAddrV4::new(broadcast, network.discovery_port),
        )?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        let inbox = Inbox::bind(host, network.inbox_port_min, network.inbox_port_max, inbound_tx).await?;

        let identity = NodeIdentity::generate();
        let endpoint = format!("{host}:{}", inbox.port());
        tracing::info!(
            %identity,
            %endpoint,
            discovery_port = network.discovery_port,
            %broadcast,
            "node starting"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = Engine::new(
            identity,
            host,
            inbox.port(),
            Settings::from_config(&config),
            config.node.headers.clone(),
            self.connector,
            self.companions,
            events_tx,
        );
        let sources = Sources {
            commands: commands_rx,
            inbox,
            inbound: inbound_rx,
            beacon,
            companion: self.companion_events,
        };
        let task = tokio::spawn(engine::run(engine, sources));

        let node = Node {
            identity,
            endpoint,
            commands: commands_tx,
            events: events_rx,
            task,
        };
        for group in &config.node.groups {
            node.join(group.as_str())?;
        }
        Ok(node)
    }
}

/// A running node. Dropping the last handle stops it.
pub struct Node {
    identity: NodeIdentity,
    endpoint: String,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    task: JoinHandle<()>,
}

impl Node {
    /// Start a node with default connector and no companions.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        NodeBuilder::new(config).start().await
    }

    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    /// "host:port" of this node's inbox, as advertised to peers.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn join(&self, group: impl Into<String>) -> Result<(), NodeError> {
        let group = group.into();
        check_len("group name", &group)?;
        self.send(Command::Join(group))
    }

    pub fn leave(&self, group: impl Into<String>) -> Result<(), NodeError> {
        let group = group.into();
        check_len("group name", &group)?;
        self.send(Command::Leave(group))
    }

    pub fn whisper(&self, peer: NodeIdentity, content: impl Into<Bytes>) -> Result<(), NodeError> {
        self.send(Command::Whisper {
            peer,
            content: content.into(),
        })
    }

    pub fn shout(&self, group: impl Into<String>, content: impl Into<Bytes>) -> Result<(), NodeError> {
        let group = group.into();
        check_len("group name", &group)?;
        self.send(Command::Shout {
            group,
            content: content.into(),
        })
    }

    /// Set a header. Only HELLOs sent after this carry it.
    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), NodeError> {
        let (key, value) = (key.into(), value.into());
        check_header(&key, &value)?;
        self.send(Command::Set { key, value })
    }

    /// Next event. `None` once the node has stopped and every event has
    /// been read.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    pub async fn peers(&self) -> Result<Vec<NodeIdentity>, NodeError> {
        self.query(Query::Peers).await
    }

    pub async fn peer_header(&self, peer: NodeIdentity, key: &str) -> Result<Option<String>, NodeError> {
        let key = key.to_string();
        self.query(|reply| Query::PeerHeader { peer, key, reply }).await
    }

    pub async fn own_groups(&self) -> Result<Vec<String>, NodeError> {
        self.query(Query::OwnGroups).await
    }

    /// Every group some peer has ever been seen in.
    pub async fn peer_groups(&self) -> Result<Vec<String>, NodeError> {
        self.query(Query::PeerGroups).await
    }

    /// Stop the reactor and wait for it to finish. Pending events are lost.
    pub async fn stop(self) -> Result<(), NodeError> {
        // A closed channel means the reactor is already gone; joining still
        // reports how it ended.
        let _ = self.commands.send(Command::Stop);
        self.task.await?;
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), NodeError> {
        self.commands.send(command).map_err(|_| NodeError::Stopped)
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query(make(tx)))?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

fn check_len(what: &'static str, s: &str) -> Result<(), NodeError> {
    if s.len() > MAX_STRING {
        return Err(NodeError::TooLong { what, len: s.len() });
    }
    Ok(())
}

/// Headers travel as one "key=value" string.
fn check_header(key: &str, value: &str) -> Result<(), NodeError> {
    if key.contains('=') {
        return Err(NodeError::HeaderKey(key.to_string()));
    }
    check_len("header entry", &format!("{key}={value}"))
}
