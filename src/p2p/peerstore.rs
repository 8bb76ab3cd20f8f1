//! Peer address book and tag store

use super::PeerInfo;

use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashMap;
use std::sync::Arc;

/// What the node knows about one peer
#[derive(Debug, Clone, Default)]
struct PeerRecord {
    /// Known addresses, oldest first
    addrs: Vec<Multiaddr>,

    /// Integer tags (reputation and the like)
    tags: HashMap<String, i64>,

    /// Last time an address was recorded (Unix)
    last_seen: i64,
}

/// Process-wide peer store, shared by every connection task
///
/// Reads and writes are individually atomic but a read followed by a write
/// is not: concurrent writers of the same tag resolve last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct PeerStore {
    peers: Arc<DashMap<PeerId, PeerRecord>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record addresses for a peer, skipping ones already known
    pub fn add_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let mut record = self.peers.entry(peer).or_default();
        for addr in addrs {
            if !record.addrs.contains(&addr) {
                record.addrs.push(addr);
            }
        }
        record.last_seen = chrono::Utc::now().timestamp();
    }

    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .get(peer)
            .map(|r| r.addrs.clone())
            .unwrap_or_default()
    }

    /// Descriptor from the address book; `addrs` is empty for unknown peers
    pub fn peer_info(&self, peer: &PeerId) -> PeerInfo {
        PeerInfo::new(*peer, self.addrs(peer))
    }

    pub fn get_tag(&self, peer: &PeerId, key: &str) -> Option<i64> {
        self.peers.get(peer).and_then(|r| r.tags.get(key).copied())
    }

    pub fn set_tag(&self, peer: PeerId, key: &str, value: i64) {
        self.peers
            .entry(peer)
            .or_default()
            .tags
            .insert(key.to_string(), value);
    }

    pub fn last_seen(&self, peer: &PeerId) -> Option<i64> {
        self.peers.get(peer).map(|r| r.last_seen)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
