//! Named groups of remote peers.
//!
//! A group only records membership. Joining or leaving bumps the member's
//! status counter, which is how the local view tracks the remote one.

use std::collections::{BTreeSet, HashMap};

use zre_core::{Message, NodeIdentity};

use crate::peer::{Delivery, Peer};

#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    members: BTreeSet<NodeIdentity>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join(&mut self, peer: &mut Peer) {
        self.members.insert(peer.identity());
        peer.inc_status();
    }

    pub fn leave(&mut self, peer: &mut Peer) {
        self.members.remove(&peer.identity());
        peer.inc_status();
    }

    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.members.contains(identity)
    }

    pub fn members(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Send a copy of `msg` to every member that is still in `peers`.
    /// Each copy takes the member's own next sequence. Returns how many
    /// were queued.
    pub fn send(&self, peers: &mut HashMap<NodeIdentity, Peer>, msg: &Message) -> usize {
        let mut queued = 0;
        for id in &self.members {
            if let Some(peer) = peers.get_mut(id) {
                if peer.send(msg.clone()) == Delivery::Queued {
                    queued += 1;
                }
            }
        }
        queued
    }
}
