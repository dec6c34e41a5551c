//! ZRE discovery wire format: the UDP beacon and protocol-wide constants.
//!
//! The beacon is a fixed 22-byte datagram. It is the only thing sent on the
//! discovery port and carries no group or content state:
//!
//! ```text
//!   Z R E       3 bytes
//!   version     1 byte, 0x01
//!   identity    16 bytes
//!   port        2 bytes, network order
//! ```
//!
//! The layout struct uses zerocopy derives so encoding and decoding are plain
//! byte copies. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::identity::{NodeIdentity, IDENTITY_SIZE};

// ── Beacon Frame ──────────────────────────────────────────────────────────────

/// On-wire layout of a discovery beacon.
///
/// Wire size: 22 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct BeaconFrame {
    /// Always `BEACON_PROTOCOL`. Anything else is foreign traffic.
    pub protocol: [u8; 3],

    /// Beacon format version. Currently 0x01.
    pub version: u8,

    /// Identity of the announcing node.
    pub identity: [u8; IDENTITY_SIZE],

    /// TCP port of the announcing node's inbox.
    pub port: U16<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(BeaconFrame, [u8; BEACON_SIZE]);

/// A decoded beacon: who is announcing and where their inbox listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub identity: NodeIdentity,
    pub port: u16,
}

impl Beacon {
    pub fn new(identity: NodeIdentity, port: u16) -> Self {
        Self { identity, port }
    }

    /// Serialize to the fixed 22-byte datagram.
    pub fn encode(&self) -> [u8; BEACON_SIZE] {
        let frame = BeaconFrame {
            protocol: BEACON_PROTOCOL,
            version: BEACON_VERSION,
            identity: *self.identity.as_bytes(),
            port: U16::new(self.port),
        };
        let mut out = [0u8; BEACON_SIZE];
        out.copy_from_slice(frame.as_bytes());
        out
    }

    /// Parse a received datagram. Length, tag and version are all checked
    /// before the identity is accepted.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let frame =
            BeaconFrame::read_from(bytes).ok_or(WireError::BeaconLength(bytes.len()))?;
        if frame.protocol != BEACON_PROTOCOL {
            return Err(WireError::BadTag(frame.protocol));
        }
        if frame.version != BEACON_VERSION {
            return Err(WireError::UnknownVersion(frame.version));
        }
        Ok(Self {
            identity: NodeIdentity::from_bytes(frame.identity),
            port: frame.port.get(),
        })
    }
}

/// Convenience wrapper over [`Beacon::encode`].
pub fn encode_beacon(identity: NodeIdentity, port: u16) -> [u8; BEACON_SIZE] {
    Beacon::new(identity, port).encode()
}

/// Convenience wrapper over [`Beacon::decode`].
pub fn decode_beacon(bytes: &[u8]) -> Result<Beacon, WireError> {
    Beacon::decode(bytes)
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol tag at the start of every beacon.
pub const BEACON_PROTOCOL: [u8; 3] = *b"ZRE";

/// Current beacon version.
pub const BEACON_VERSION: u8 = 0x01;

/// Beacon datagram size in bytes.
pub const BEACON_SIZE: usize = 22;

/// Default UDP port for beacons.
pub const DISCOVERY_PORT: u16 = 9991;

/// Default beacon interval. The peer sweep runs on the same tick.
pub const BEACON_INTERVAL_MS: u64 = 1000;

/// Default silence after which a peer is pinged.
pub const PEER_EVASIVE_MS: u64 = 5000;

/// Default silence after which a peer is removed.
pub const PEER_EXPIRED_MS: u64 = 10000;

/// Header advertising a node's file-distribution service endpoint.
pub const HEADER_FILEMQ: &str = "X-FILEMQ";

/// Header advertising a log collector subscription endpoint.
pub const HEADER_ZRELOG: &str = "X-ZRELOG";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a beacon datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("beacon length {0} is not {}", BEACON_SIZE)]
    BeaconLength(usize),

    #[error("bad beacon tag: {0:02x?}")]
    BadTag([u8; 3]),

    #[error("unknown beacon version: 0x{0:02x}")]
    UnknownVersion(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_layout_matches_wire_format() {
        let id = NodeIdentity::from_bytes([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        let bytes = encode_beacon(id, 0xC123);
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[0..3], b"ZRE");
        assert_eq!(bytes[3], 0x01);
        assert_eq!(&bytes[4..20], id.as_bytes());
        assert_eq!(&bytes[20..22], &[0xC1, 0x23]);
    }

    #[test]
    fn beacon_round_trip_extremes() {
        for port in [0u16, 1, 0x00ff, 0xff00, u16::MAX] {
            for raw in [[0u8; 16], [0xff; 16]] {
                let id = NodeIdentity::from_bytes(raw);
                let decoded = decode_beacon(&encode_beacon(id, port)).unwrap();
                assert_eq!(decoded, Beacon::new(id, port));
            }
        }
        let id = NodeIdentity::generate();
        assert_eq!(decode_beacon(&encode_beacon(id, 49152)).unwrap().identity, id);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = encode_beacon(NodeIdentity::generate(), 5670);
        assert_eq!(decode_beacon(&bytes[..21]), Err(WireError::BeaconLength(21)));
        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(decode_beacon(&long), Err(WireError::BeaconLength(23)));
        assert_eq!(decode_beacon(&[]), Err(WireError::BeaconLength(0)));
    }

    #[test]
    fn bad_tag_is_rejected() {
        let mut bytes = encode_beacon(NodeIdentity::generate(), 5670);
        bytes[0] = b'X';
        assert!(matches!(decode_beacon(&bytes), Err(WireError::BadTag(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode_beacon(NodeIdentity::generate(), 5670);
        bytes[3] = 0x02;
        let err = decode_beacon(&bytes).unwrap_err();
        assert_eq!(err, WireError::UnknownVersion(2));
        assert!(err.to_string().contains("0x02"));
    }
}
