//! Companion services that ride on peer discovery.
//!
//! A companion names a header key. When a peer's HELLO advertises that key,
//! the companion is handed the advertised endpoint and connects to it on
//! its own. Anything the companion wants the application to see comes back
//! through the channel given to [`crate::NodeBuilder::companion_events`].

pub use zre_core::wire::{HEADER_FILEMQ, HEADER_ZRELOG};

pub trait Companion: Send {
    /// Header whose value is this companion's endpoint on remote peers.
    fn header_key(&self) -> &str;

    /// A peer advertised `endpoint` under [`Companion::header_key`].
    fn connect(&mut self, endpoint: &str);
}
