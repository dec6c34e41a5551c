//! The ZRE node protocol engine.
//!
//! A [`Node`] discovers other nodes on the local segment by UDP beacon,
//! opens a mailbox to each one, and exchanges whispers (unicast) and shouts
//! (group multicast) with them. All protocol state lives in one reactor task;
//! the `Node` handle only sends it commands and reads its events.

pub mod beacon;
pub mod companion;
pub mod event;
pub mod group;
pub mod iface;
pub mod node;
pub mod peer;
pub mod transport;

mod engine;
mod error;

pub use companion::Companion;
pub use error::NodeError;
pub use event::{Command, Event, Query};
pub use node::{Node, NodeBuilder};
pub use transport::{Connector, Mailbox, TcpConnector};
pub use zre_core::NodeIdentity;
