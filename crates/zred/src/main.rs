//! ZRE node daemon.
//!
//! Joins the configured groups, advertises the configured headers, and logs
//! every event until interrupted.
//!
//!   zred [interface]

use anyhow::{Context, Result};

use zre_core::config::NodeConfig;
use zre_node::{Event, Node};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = NodeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = NodeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        NodeConfig::default()
    });
    if let Some(interface) = std::env::args().nth(1) {
        config.network.interface = interface;
    }

    let mut node = Node::start(config).await.context("failed to start node")?;
    tracing::info!(identity = %node.identity(), endpoint = node.endpoint(), "zred running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            event = node.recv() => match event {
                Some(event) => log_event(&event),
                None => {
                    tracing::error!("node exited");
                    break;
                }
            },
        }
    }

    node.stop().await.context("node did not stop cleanly")?;
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Enter { peer } | Event::Exit { peer } => {
            tracing::info!(event = event.name(), %peer);
        }
        Event::Join { peer, group } | Event::Leave { peer, group } => {
            tracing::info!(event = event.name(), %peer, %group);
        }
        Event::Whisper { peer, content } => {
            tracing::info!(
                event = event.name(),
                %peer,
                content = %String::from_utf8_lossy(content)
            );
        }
        Event::Shout {
            peer,
            group,
            content,
        } => {
            tracing::info!(
                event = event.name(),
                %peer,
                %group,
                content = %String::from_utf8_lossy(content)
            );
        }
        Event::Companion { frames } => {
            tracing::info!(event = event.name(), frames = frames.len());
        }
    }
}
