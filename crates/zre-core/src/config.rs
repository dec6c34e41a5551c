//! Configuration system for ZRE nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ZRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/zre/config.toml
//!   3. ~/.config/zre/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{BEACON_INTERVAL_MS, DISCOVERY_PORT, PEER_EVASIVE_MS, PEER_EXPIRED_MS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub mailbox: MailboxConfig,
    pub node: NodeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface name. Empty = first non-loopback IPv4 interface.
    pub interface: String,
    /// Own address advertised in HELLO. Empty = take it from the interface.
    pub host: String,
    /// UDP port for beacons.
    pub discovery_port: u16,
    /// Where beacons are sent.
    pub broadcast_addr: String,
    /// Inbox TCP port range. The inbox binds a free port inside it.
    pub inbox_port_min: u16,
    pub inbox_port_max: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Beacon broadcast and peer sweep interval.
    pub beacon_interval_ms: u64,
    /// Silence after which a peer is pinged.
    pub peer_evasive_ms: u64,
    /// Silence after which a peer is dropped.
    pub peer_expired_ms: u64,
    /// Ping an evasive peer on every sweep instead of once per silence.
    pub ping_every_tick: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Outbound messages queued per peer before sends start failing.
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Groups joined at start.
    pub groups: Vec<String>,
    /// Initial header values advertised in HELLO.
    pub headers: BTreeMap<String, String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            host: String::new(),
            discovery_port: DISCOVERY_PORT,
            broadcast_addr: "255.255.255.255".to_string(),
            inbox_port_min: 0xc000,
            inbox_port_max: 0xffff,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            beacon_interval_ms: BEACON_INTERVAL_MS,
            peer_evasive_ms: PEER_EVASIVE_MS,
            peer_expired_ms: PEER_EXPIRED_MS,
            ping_every_tick: false,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self { queue_depth: 1000 }
    }
}

impl TimingConfig {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn peer_evasive(&self) -> Duration {
        Duration::from_millis(self.peer_evasive_ms)
    }

    pub fn peer_expired(&self) -> Duration {
        Duration::from_millis(self.peer_expired_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("zre")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NodeConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ZRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NodeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.beacon_interval_ms == 0 {
            return Err(ConfigError::Invalid("beacon_interval_ms must be > 0".into()));
        }
        if t.peer_evasive_ms >= t.peer_expired_ms {
            return Err(ConfigError::Invalid(format!(
                "peer_evasive_ms ({}) must be below peer_expired_ms ({})",
                t.peer_evasive_ms, t.peer_expired_ms
            )));
        }
        let n = &self.network;
        if n.inbox_port_min == 0 || n.inbox_port_min > n.inbox_port_max {
            return Err(ConfigError::Invalid(format!(
                "inbox port range {}..={} is empty",
                n.inbox_port_min, n.inbox_port_max
            )));
        }
        if self.mailbox.queue_depth == 0 {
            return Err(ConfigError::Invalid("mailbox queue_depth must be > 0".into()));
        }
        Ok(())
    }

    /// Apply ZRE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ZRE_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Ok(v) = std::env::var("ZRE_NETWORK__HOST") {
            self.network.host = v;
        }
        if let Ok(v) = std::env::var("ZRE_NETWORK__BROADCAST_ADDR") {
            self.network.broadcast_addr = v;
        }
        if let Ok(v) = std::env::var("ZRE_NETWORK__DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.discovery_port = p;
            }
        }
        if let Ok(v) = std::env::var("ZRE_TIMING__BEACON_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.beacon_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("ZRE_TIMING__PEER_EVASIVE_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.peer_evasive_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("ZRE_TIMING__PEER_EXPIRED_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.peer_expired_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.network.discovery_port, 9991);
        assert_eq!(config.timing.beacon_interval(), Duration::from_secs(1));
        assert_eq!(config.timing.peer_evasive(), Duration::from_secs(5));
        assert_eq!(config.timing.peer_expired(), Duration::from_secs(10));
        assert!(!config.timing.ping_every_tick);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [timing]
            beacon_interval_ms = 250

            [node]
            groups = ["chat"]
            headers = { "X-FILEMQ" = "tcp://10.0.0.1:5000" }
        "#;
        let config: NodeConfig = toml::from_str(text).unwrap();
        assert_eq!(config.timing.beacon_interval_ms, 250);
        assert_eq!(config.timing.peer_expired_ms, PEER_EXPIRED_MS);
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(config.node.groups, vec!["chat".to_string()]);
        assert_eq!(
            config.node.headers.get("X-FILEMQ").map(String::as_str),
            Some("tcp://10.0.0.1:5000")
        );
    }

    #[test]
    fn evasive_must_precede_expiry() {
        let mut config = NodeConfig::default();
        config.timing.peer_evasive_ms = config.timing.peer_expired_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_port_range_is_rejected() {
        let mut config = NodeConfig::default();
        config.network.inbox_port_min = 50000;
        config.network.inbox_port_max = 40000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_survives_toml() {
        let text = toml::to_string_pretty(&NodeConfig::default()).unwrap();
        let back: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, NodeConfig::default());
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("zre-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("ZRE_CONFIG", config_path.to_str().unwrap());
        }

        let path = NodeConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = NodeConfig::load().expect("load should succeed");
        assert_eq!(config.timing, TimingConfig::default());

        unsafe {
            std::env::remove_var("ZRE_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
