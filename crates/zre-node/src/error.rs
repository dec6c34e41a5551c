use std::net::Ipv4Addr;

use zre_core::config::ConfigError;

/// Errors surfaced to the application by a node.
///
/// Everything here is either a startup failure or a sign that the reactor
/// has already stopped. Steady-state protocol trouble is logged, not returned.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("interface lookup failed: {0}")]
    InterfaceLookup(#[source] nix::Error),

    /// Holds the interface name filter; empty means any interface.
    #[error("no usable non-loopback IPv4 interface (filter {0:?})")]
    NoInterface(String),

    #[error("failed to bind discovery port {port}: {source}")]
    DiscoveryBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("no free inbox port on {host} in {min}..={max}")]
    InboxBind { host: Ipv4Addr, min: u16, max: u16 },

    #[error("{what} of {len} bytes exceeds 255")]
    TooLong { what: &'static str, len: usize },

    #[error("header key {0:?} must not contain '='")]
    HeaderKey(String),

    #[error("node has stopped")]
    Stopped,

    #[error("node task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
