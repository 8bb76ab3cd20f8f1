//! Profiles: user-level identities that may own several peer ids

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable identifier of a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A local or remote user's identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,

    /// Handle used in dataset references
    pub peername: String,

    /// Peer ids this profile is known to operate
    #[serde(default)]
    pub peer_ids: Vec<PeerId>,

    /// Dialable addresses, each ending in `/p2p/<peer id>`
    #[serde(default)]
    pub network_addrs: Vec<Multiaddr>,

    /// Set on profiles describing a currently connected peer
    #[serde(default)]
    pub online: bool,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: ProfileId, peername: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            peername: peername.into(),
            peer_ids: vec![],
            network_addrs: vec![],
            online: false,
            created: now,
            updated: now,
        }
    }

    pub fn with_peer_ids(mut self, peer_ids: Vec<PeerId>) -> Self {
        self.peer_ids = peer_ids;
        self
    }

    /// Record a peer id for this profile, keeping the existing order
    pub fn add_peer_id(&mut self, peer_id: PeerId) -> bool {
        if self.peer_ids.contains(&peer_id) {
            return false;
        }
        self.peer_ids.push(peer_id);
        true
    }
}
