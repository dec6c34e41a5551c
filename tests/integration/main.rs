//! ZRE integration test harness.
//!
//! Every test runs real nodes inside the test process, talking over the
//! loopback interface. Beacons go to 127.255.255.255, so all nodes on a
//! discovery port hear each other. Each test takes its own discovery port
//! and must not reuse another test's.
//!
//!   cargo test --test integration

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::Instant;

use zre_core::config::NodeConfig;
use zre_node::{Event, Node};

mod discovery;
mod expiry;
mod groups;
mod messaging;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long any single expected event may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// A discovery port no other test in this run uses.
pub fn discovery_port() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(0);
    let base = 20000 + (std::process::id() % 1000) as u16 * 20;
    base + NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Loopback config with short timers.
pub fn test_config(discovery_port: u16) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.host = "127.0.0.1".into();
    config.network.broadcast_addr = "127.255.255.255".into();
    config.network.discovery_port = discovery_port;
    config.timing.beacon_interval_ms = 100;
    config.timing.peer_evasive_ms = 500;
    config.timing.peer_expired_ms = 1500;
    config
}

/// Log to the test writer when RUST_LOG is set. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn start_node(discovery_port: u16) -> Result<Node> {
    init_tracing();
    Node::start(test_config(discovery_port))
        .await
        .context("node failed to start")
}

/// Read events until one matches, failing after [`WAIT`].
pub async fn wait_for(node: &mut Node, what: &str, pred: impl Fn(&Event) -> bool) -> Result<Event> {
    let deadline = Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, node.recv())
            .await
            .with_context(|| format!("timed out waiting for {what}"))?
            .context("node stopped")?;
        if pred(&event) {
            return Ok(event);
        }
    }
}

/// Fail if a matching event shows up within `window`.
pub async fn expect_none(
    node: &mut Node,
    window: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Result<()> {
    let deadline = Instant::now() + window;
    while let Ok(event) = tokio::time::timeout_at(deadline, node.recv()).await {
        match event {
            Some(event) if pred(&event) => bail!("unexpected event {event:?}"),
            Some(_) => {}
            None => break,
        }
    }
    Ok(())
}

/// Two nodes on a fresh port that have each seen the other enter.
pub async fn discovered_pair() -> Result<(Node, Node)> {
    let port = discovery_port();
    let mut a = start_node(port).await?;
    let mut b = start_node(port).await?;
    let (ida, idb) = (a.identity(), b.identity());
    wait_for(&mut a, "A sees B enter", |e| *e == Event::Enter { peer: idb }).await?;
    wait_for(&mut b, "B sees A enter", |e| *e == Event::Enter { peer: ida }).await?;
    Ok((a, b))
}
