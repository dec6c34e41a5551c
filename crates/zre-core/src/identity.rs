//! Node identity. A random 128-bit identifier, fixed for the life of the process.
//!
//! On the wire the identity travels as 16 raw bytes (beacon) or as its
//! uppercase hex rendering (mailbox greeting, peer table keys, events).

use std::fmt;
use std::str::FromStr;

/// Size of a node identity in bytes.
pub const IDENTITY_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity([u8; IDENTITY_SIZE]);

impl NodeIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; IDENTITY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_SIZE] {
        &self.0
    }

    /// Uppercase hex rendering, 32 characters.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node identity {0:?}: expected 32 hex characters")]
pub struct IdentityParseError(pub String);

impl FromStr for NodeIdentity {
    type Err = IdentityParseError;

    /// Accepts either case; the canonical form is uppercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; IDENTITY_SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| IdentityParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_rendering_is_uppercase() {
        let id = NodeIdentity::from_bytes([0xab; 16]);
        assert_eq!(id.to_hex(), "AB".repeat(16));
        assert_eq!(id.to_string(), id.to_hex());
    }

    #[test]
    fn parse_accepts_both_cases() {
        let id = NodeIdentity::generate();
        let upper: NodeIdentity = id.to_hex().parse().unwrap();
        let lower: NodeIdentity = id.to_hex().to_lowercase().parse().unwrap();
        assert_eq!(upper, id);
        assert_eq!(lower, id);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("ABCD".parse::<NodeIdentity>().is_err());
        assert!("ZZ".repeat(16).parse::<NodeIdentity>().is_err());
    }

    #[test]
    fn generated_identities_differ() {
        assert_ne!(NodeIdentity::generate(), NodeIdentity::generate());
    }
}
