//! One remote node as this node sees it.
//!
//! A peer owns the outbound mailbox to the remote inbox, the sequence
//! counters in both directions, the remote's last advertised status and
//! headers, and the liveness deadlines the sweep checks.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use zre_core::{Message, NodeIdentity};

use crate::transport::{Connector, Mailbox};

/// How long a peer may stay silent before it is pinged, and before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub evasive: Duration,
    pub expired: Duration,
}

/// Outcome of [`Peer::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the mailbox.
    Queued,
    /// No mailbox is open; the message was dropped.
    NotConnected,
    /// The message could not be encoded; the mailbox is untouched.
    Unencodable,
    /// The mailbox refused it. The peer is now disconnected.
    Failed,
}

#[derive(Debug)]
pub struct Peer {
    identity: NodeIdentity,
    mailbox: Option<Mailbox>,
    endpoint: Option<String>,
    ready: bool,
    status: u8,
    sent_sequence: u16,
    want_sequence: u16,
    liveness: Liveness,
    evasive_at: Instant,
    expired_at: Instant,
    pinged: bool,
    headers: BTreeMap<String, String>,
}

impl Peer {
    pub fn new(identity: NodeIdentity, liveness: Liveness, now: Instant) -> Self {
        Self {
            identity,
            mailbox: None,
            endpoint: None,
            ready: false,
            status: 0,
            sent_sequence: 0,
            want_sequence: 0,
            liveness,
            evasive_at: now + liveness.evasive,
            expired_at: now + liveness.expired,
            pinged: false,
            headers: BTreeMap::new(),
        }
    }

    /// Open a mailbox to `endpoint`. Any previous mailbox is replaced.
    pub fn connect(
        &mut self,
        origin: NodeIdentity,
        endpoint: &str,
        connector: &mut dyn Connector,
        depth: usize,
    ) {
        self.mailbox = Some(connector.connect(origin, endpoint, depth));
        self.endpoint = Some(endpoint.to_string());
    }

    /// Close the mailbox and forget the endpoint. The peer stays known,
    /// and stays ready, until the sweep expires it or it is reconnected.
    pub fn disconnect(&mut self) {
        self.mailbox = None;
        self.endpoint = None;
    }

    /// Stamp the next outbound sequence on `msg` and queue it.
    pub fn send(&mut self, mut msg: Message) -> Delivery {
        let Some(mailbox) = &self.mailbox else {
            tracing::trace!(peer = %self.identity, kind = msg.kind().name(), "not connected, dropping");
            return Delivery::NotConnected;
        };

        let sequence = self.sent_sequence.wrapping_add(1);
        msg.set_sequence(sequence);
        let frames = match msg.encode() {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(peer = %self.identity, error = %e, "message not encodable");
                return Delivery::Unencodable;
            }
        };
        self.sent_sequence = sequence;

        match mailbox.try_send(frames) {
            Ok(()) => Delivery::Queued,
            Err(e) => {
                tracing::warn!(
                    peer = %self.identity,
                    kind = msg.kind().name(),
                    error = %e,
                    "send failed, disconnecting peer"
                );
                self.disconnect();
                Delivery::Failed
            }
        }
    }

    /// Advance the expected inbound sequence and compare. On a mismatch the
    /// expectation is rolled back and `false` returned; the caller still
    /// processes the message.
    pub fn check_sequence(&mut self, msg: &Message) -> bool {
        let want = self.want_sequence.wrapping_add(1);
        if msg.sequence() == want {
            self.want_sequence = want;
            true
        } else {
            false
        }
    }

    /// Push the liveness deadlines out from `now`.
    pub fn refresh(&mut self, now: Instant) {
        self.evasive_at = now + self.liveness.evasive;
        self.expired_at = now + self.liveness.expired;
        self.pinged = false;
    }

    pub fn is_evasive(&self, now: Instant) -> bool {
        now >= self.evasive_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expired_at
    }

    pub fn pinged(&self) -> bool {
        self.pinged
    }

    pub fn mark_pinged(&mut self) {
        self.pinged = true;
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.mailbox.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    /// Bump the status counter; wraps at 256.
    pub fn inc_status(&mut self) {
        self.status = self.status.wrapping_add(1);
    }

    pub fn sent_sequence(&self) -> u16 {
        self.sent_sequence
    }

    pub fn want_sequence(&self) -> u16 {
        self.want_sequence
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn set_headers(&mut self, headers: BTreeMap<String, String>) {
        self.headers = headers;
    }
}
