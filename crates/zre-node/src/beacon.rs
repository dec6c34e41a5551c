//! UDP beacon transceiver.
//!
//! One socket does both jobs: it is bound to the discovery port on all
//! addresses so it hears every beacon on the segment, and it sends this
//! node's own beacon to the broadcast address on the same port. A node hears
//! its own beacons too; the engine drops them by identity.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use zre_core::wire::BEACON_SIZE;
use zre_core::Beacon;

use crate::NodeError;

pub struct BeaconSocket {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl BeaconSocket {
    /// Bind `port` on 0.0.0.0 and address outgoing beacons to `target`.
    /// Several nodes on one host may bind the same port.
    pub fn bind(port: u16, target: SocketAddrV4) -> Result<Self, NodeError> {
        let socket = make_broadcast_socket(port)
            .and_then(|s| UdpSocket::from_std(s.into()))
            .map_err(|source| NodeError::DiscoveryBind { port, source })?;
        tracing::info!(port, %target, "beacon socket bound");
        Ok(Self { socket, target })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Send one beacon, waiting for the socket to become writable.
    pub async fn announce(&self, beacon: &Beacon) -> io::Result<()> {
        let n = self
            .socket
            .send_to(&beacon.encode(), SocketAddr::V4(self.target))
            .await?;
        tracing::trace!(bytes = n, "beacon sent");
        Ok(())
    }

    /// Wait until a datagram may be available.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    /// Take one datagram if there is one. Datagrams that are not valid
    /// beacons are consumed and discarded.
    pub fn poll(&self) -> Option<(Beacon, Ipv4Addr)> {
        // Oversized so a long datagram is seen as long, not truncated to a valid size.
        let mut buf = [0u8; BEACON_SIZE * 4];
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(from))) => match Beacon::decode(&buf[..len]) {
                Ok(beacon) => Some((beacon, *from.ip())),
                Err(e) => {
                    tracing::trace!(%from, error = %e, "ignoring datagram");
                    None
                }
            },
            Ok((_, SocketAddr::V6(_))) => None,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::warn!(error = %e, "beacon receive failed");
                None
            }
        }
    }
}

fn make_broadcast_socket(port: u16) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket)
}
