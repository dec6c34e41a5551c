//! Own-address discovery.

use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use zre_core::config::NetworkConfig;

use crate::NodeError;

/// First IPv4 address on an up, non-loopback interface. An empty
/// `interface` accepts any interface name.
pub fn own_ipv4(interface: &str) -> Result<Ipv4Addr, NodeError> {
    let addrs = getifaddrs().map_err(NodeError::InterfaceLookup)?;
    for ifaddr in addrs {
        if !interface.is_empty() && ifaddr.interface_name != interface {
            continue;
        }
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
            || !ifaddr.flags.contains(InterfaceFlags::IFF_UP)
        {
            continue;
        }
        if let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
            let addr = *SocketAddrV4::from(*sin).ip();
            tracing::debug!(interface = %ifaddr.interface_name, %addr, "selected own address");
            return Ok(addr);
        }
    }
    Err(NodeError::NoInterface(interface.to_string()))
}

/// The address this node advertises: `host` when configured, otherwise
/// whatever [`own_ipv4`] finds.
pub fn resolve_host(network: &NetworkConfig) -> Result<Ipv4Addr, NodeError> {
    if network.host.is_empty() {
        own_ipv4(&network.interface)
    } else {
        network
            .host
            .parse()
            .map_err(|_| NodeError::InvalidAddress(network.host.clone()))
    }
}
