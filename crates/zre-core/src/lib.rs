//! Node identity, wire formats and configuration shared by ZRE nodes.
//! The node crate and the daemon both depend on this one.

pub mod config;
pub mod identity;
pub mod msg;
pub mod wire;

pub use identity::NodeIdentity;
pub use msg::{DecodeError, EncodeError, Message, MessageKind};
pub use wire::{Beacon, WireError};
