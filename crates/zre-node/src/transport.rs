//! Addressed message transport: one inbox per node, one mailbox per peer.
//!
//! Both ends speak plain TCP. A transport message is one or more frames:
//!
//! ```text
//!   flags    1 byte   bit 0 set = another frame follows
//!   length   4 bytes  big-endian
//!   body     length bytes
//! ```
//!
//! The first transport message on every connection is the greeting: a single
//! frame holding the connecting node's identity in hex. The inbox tags every
//! later message from that connection with it, so the engine always knows who
//! a message came from without trusting anything inside the message itself.

use std::io;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use zre_core::NodeIdentity;

use crate::NodeError;

/// All frames of one transport message.
pub type Frames = Vec<Bytes>;

const FLAG_MORE: u8 = 0x01;
const FRAME_HEADER_SIZE: usize = 5;

/// Largest frame body accepted from the network.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ── Frame codec ───────────────────────────────────────────────────────────────

/// Write one transport message. Does not flush.
pub async fn write_frames<W>(writer: &mut W, frames: &[Bytes]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = frames.iter().map(|f| FRAME_HEADER_SIZE + f.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for (i, frame) in frames.iter().enumerate() {
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        out.put_u8(if i + 1 < frames.len() { FLAG_MORE } else { 0 });
        out.put_u32(len);
        out.put_slice(frame);
    }
    writer.write_all(&out).await
}

/// Read one transport message. `Ok(None)` on a clean close between messages.
pub async fn read_frames<R>(reader: &mut R) -> io::Result<Option<Frames>>
where
    R: AsyncRead + Unpin,
{
    let mut frames = Vec::new();
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && frames.is_empty() => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        }
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit"),
            ));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        frames.push(Bytes::from(body));
        if header[0] & FLAG_MORE == 0 {
            return Ok(Some(frames));
        }
    }
}

// ── Inbox ─────────────────────────────────────────────────────────────────────

/// A transport message as delivered by the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub sender: NodeIdentity,
    pub frames: Frames,
}

/// The node's listening endpoint. Dropping it stops accepting connections;
/// connections already accepted drain until their reader hits the closed
/// channel.
pub struct Inbox {
    port: u16,
    accept_task: JoinHandle<()>,
    // Held so the engine's receiver never observes a closed channel while the
    // inbox is alive.
    _tx: mpsc::Sender<Inbound>,
}

impl Inbox {
    /// Bind the first free port in `min..=max`, starting the scan at a
    /// random offset so nodes started together spread over the range.
    pub async fn bind(
        host: Ipv4Addr,
        min: u16,
        max: u16,
        tx: mpsc::Sender<Inbound>,
    ) -> Result<Self, NodeError> {
        let span = u32::from(max.saturating_sub(min)) + 1;
        let start = rand::random::<u32>() % span;

        for step in 0..span {
            let port = min + ((start + step) % span) as u16;
            match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(listener) => {
                    tracing::debug!(port, "inbox bound");
                    let accept_task = tokio::spawn(accept_loop(listener, tx.clone()));
                    return Ok(Self {
                        port,
                        accept_task,
                        _tx: tx,
                    });
                }
                Err(e) => tracing::trace!(port, error = %e, "inbox port unavailable"),
            }
        }
        Err(NodeError::InboxBind { host, min, max })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Inbound>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "inbox accept failed");
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, tx).await {
                tracing::debug!(%peer_addr, error = %e, "inbox connection dropped");
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, tx: mpsc::Sender<Inbound>) -> Result<()> {
    stream.set_nodelay(true).context("TCP_NODELAY")?;
    let mut reader = BufReader::new(stream);

    let greeting = read_frames(&mut reader)
        .await?
        .context("connection closed before greeting")?;
    let hex = greeting
        .first()
        .and_then(|f| std::str::from_utf8(f).ok())
        .context("greeting is not text")?;
    let sender: NodeIdentity = hex.parse()?;
    tracing::trace!(%sender, "inbox connection greeted");

    while let Some(frames) = read_frames(&mut reader).await? {
        if tx.send(Inbound { sender, frames }).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ── Mailbox ───────────────────────────────────────────────────────────────────

/// Why a message could not be queued on a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox queue is full")]
    Full,
    #[error("mailbox connection is closed")]
    Closed,
}

/// Sending half of an outbound connection to one peer's inbox.
///
/// Sends never block. The queue is bounded; a full queue or a dead
/// connection is reported to the caller immediately.
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<Frames>,
}

impl Mailbox {
    /// A mailbox and the receiving end a connector drains.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Frames>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    pub fn try_send(&self, frames: Frames) -> Result<(), MailboxError> {
        self.tx.try_send(frames).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }
}

/// Opens mailboxes. The engine only ever talks to peers through this.
pub trait Connector: Send {
    /// Open a mailbox to `endpoint` ("host:port"), greeting it as `origin`.
    /// Must not block; connection failures surface later as a closed mailbox.
    fn connect(&mut self, origin: NodeIdentity, endpoint: &str, depth: usize) -> Mailbox;
}

/// Connector that dials the peer's inbox over TCP from a writer task.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&mut self, origin: NodeIdentity, endpoint: &str, depth: usize) -> Mailbox {
        let (mailbox, rx) = Mailbox::channel(depth);
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_mailbox(origin, &endpoint, rx).await {
                tracing::debug!(%endpoint, error = %e, "mailbox connection ended");
            }
        });
        mailbox
    }
}

async fn run_mailbox(
    origin: NodeIdentity,
    endpoint: &str,
    mut rx: mpsc::Receiver<Frames>,
) -> Result<()> {
    let stream = TcpStream::connect(endpoint)
        .await
        .with_context(|| format!("connect to {endpoint}"))?;
    stream.set_nodelay(true).context("TCP_NODELAY")?;
    let mut writer = BufWriter::new(stream);

    write_frames(&mut writer, &[Bytes::from(origin.to_hex())]).await?;
    writer.flush().await?;

    while let Some(frames) = rx.recv().await {
        write_frames(&mut writer, &frames).await?;
        writer.flush().await?;
    }
    Ok(())
}

// ── Test support ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use zre_core::Message;

    use super::*;

    /// In-memory connector: every mailbox is a channel the test can drain.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryConnector {
        links: Arc<Mutex<HashMap<String, Vec<mpsc::Receiver<Frames>>>>>,
    }

    impl MemoryConnector {
        /// How many mailboxes have been opened to `endpoint`.
        pub(crate) fn connections(&self, endpoint: &str) -> usize {
            self.links
                .lock()
                .unwrap()
                .get(endpoint)
                .map_or(0, Vec::len)
        }

        /// Drain and decode everything queued on the latest mailbox to `endpoint`.
        pub(crate) fn sent(&self, endpoint: &str) -> Vec<Message> {
            let mut links = self.links.lock().unwrap();
            let Some(rx) = links.get_mut(endpoint).and_then(|v| v.last_mut()) else {
                return Vec::new();
            };
            let mut out = Vec::new();
            while let Ok(frames) = rx.try_recv() {
                out.push(Message::decode(&frames).unwrap().unwrap());
            }
            out
        }

        /// Drop the receiving ends to `endpoint`, as if the peer went away.
        pub(crate) fn sever(&self, endpoint: &str) {
            self.links.lock().unwrap().remove(endpoint);
        }
    }

    impl Connector for MemoryConnector {
        fn connect(&mut self, _origin: NodeIdentity, endpoint: &str, depth: usize) -> Mailbox {
            let (mailbox, rx) = Mailbox::channel(depth);
            self.links
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push(rx);
            mailbox
        }
    }
}
