//! What flows between the application and the reactor.

use bytes::Bytes;
use tokio::sync::oneshot;

use zre_core::NodeIdentity;

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A peer was discovered.
    Enter { peer: NodeIdentity },
    /// A peer went silent for too long and was dropped.
    Exit { peer: NodeIdentity },
    /// A peer sent us content directly.
    Whisper { peer: NodeIdentity, content: Bytes },
    /// A peer sent content to a group.
    Shout {
        peer: NodeIdentity,
        group: String,
        content: Bytes,
    },
    Join { peer: NodeIdentity, group: String },
    Leave { peer: NodeIdentity, group: String },
    /// Frames passed through unchanged from a companion service.
    Companion { frames: Vec<Bytes> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Enter { .. } => "ENTER",
            Event::Exit { .. } => "EXIT",
            Event::Whisper { .. } => "WHISPER",
            Event::Shout { .. } => "SHOUT",
            Event::Join { .. } => "JOIN",
            Event::Leave { .. } => "LEAVE",
            Event::Companion { .. } => "COMPANION",
        }
    }

    /// The peer the event concerns, if any.
    pub fn peer(&self) -> Option<NodeIdentity> {
        match self {
            Event::Enter { peer }
            | Event::Exit { peer }
            | Event::Whisper { peer, .. }
            | Event::Shout { peer, .. }
            | Event::Join { peer, .. }
            | Event::Leave { peer, .. } => Some(*peer),
            Event::Companion { .. } => None,
        }
    }
}

/// Instruction from the application to the reactor.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Leave(String),
    Whisper { peer: NodeIdentity, content: Bytes },
    Shout { group: String, content: Bytes },
    /// Set a header advertised in HELLO to peers discovered from now on.
    Set { key: String, value: String },
    Query(Query),
    Stop,
}

/// Read-only questions about reactor state, answered on a oneshot.
#[derive(Debug)]
pub enum Query {
    Peers(oneshot::Sender<Vec<NodeIdentity>>),
    PeerHeader {
        peer: NodeIdentity,
        key: String,
        reply: oneshot::Sender<Option<String>>,
    },
    OwnGroups(oneshot::Sender<Vec<String>>),
    PeerGroups(oneshot::Sender<Vec<String>>),
}
