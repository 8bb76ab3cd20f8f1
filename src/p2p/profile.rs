//! Profile exchange, peer-list exchange and connection announcements

use super::handlers::send_reply;
use super::transport::encapsulate;
use super::{Message, MsgType, P2PError, PeerInfo, QriNode, WrappedStream};
use crate::repo::Profile;

use futures::future::{BoxFuture, FutureExt};
use libp2p::PeerId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub(super) fn handle_profile<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        // replies are stored by request_profile, which knows the sender
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        match msg.decode_body::<Profile>() {
            Ok(profile) => {
                if let Err(e) = node.upsert_profile(profile, Some(msg.initiator)) {
                    tracing::debug!("error storing profile of {}: {}", msg.initiator, e);
                }
            }
            Err(e) => tracing::debug!("invalid profile from {}: {}", msg.initiator, e),
        }

        match node.repo().profile() {
            Ok(local) => send_reply(ws, &msg, &local).await,
            Err(e) => {
                tracing::debug!("error reading local profile: {}", e);
                true
            }
        }
    }
    .boxed()
}

pub(super) fn handle_qri_peers<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let profiles: Vec<Profile> = node.connected_qri_profiles().into_values().collect();
        send_reply(ws, &msg, &profiles).await
    }
    .boxed()
}

pub(super) fn handle_connected<'a>(
    node: &'a Arc<QriNode>,
    _ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let info = node.peer_info(msg.initiator);
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = node.add_qri_peer(info).await {
                tracing::debug!("error adding qri peer {}: {}", msg.initiator, e);
            }
        });
        true
    }
    .boxed()
}

impl QriNode {
    /// Store a remote profile, merging peer ids with any already known
    pub(crate) fn upsert_profile(
        &self,
        mut profile: Profile,
        peer: Option<PeerId>,
    ) -> Result<Profile, P2PError> {
        let profiles = self.repo().profiles();
        if let Ok(existing) = profiles.get_profile(&profile.id) {
            let mut peer_ids = existing.peer_ids;
            for id in profile.peer_ids {
                if !peer_ids.contains(&id) {
                    peer_ids.push(id);
                }
            }
            profile.peer_ids = peer_ids;
            profile.created = existing.created;
        }

        if let Some(peer) = peer {
            profile.add_peer_id(peer);
            profile.online = true;
        }

        profiles.put_profile(profile.clone())?;
        Ok(profile)
    }

    /// Exchange profiles with `pid`, storing theirs
    pub async fn request_profile(self: &Arc<Self>, pid: PeerId) -> Result<Profile, P2PError> {
        let local = self.repo().profile()?;
        let msg = Message::encode(self.id(), MsgType::Profile, &local)?;
        let reply = self.request(pid, msg).await?;

        let profile: Profile = reply.decode_body()?;
        let profile = self.upsert_profile(profile, Some(pid))?;
        tracing::debug!("Peer {} is {} ({})", pid, profile.peername, profile.id);
        Ok(profile)
    }

    /// Ask `pid` for the qri peers it is connected to
    pub async fn request_qri_peers(self: &Arc<Self>, pid: PeerId) -> Result<Vec<PeerInfo>, P2PError> {
        let msg = Message::new(self.id(), MsgType::QriPeers, Value::Null);
        let reply = self.request(pid, msg).await?;
        let profiles: Vec<Profile> = reply.decode_body()?;

        let mut found: HashMap<PeerId, Vec<libp2p::Multiaddr>> = HashMap::new();
        let mut order = vec![];
        for profile in profiles {
            for addr in &profile.network_addrs {
                let Ok(info) = PeerInfo::from_multiaddr(addr) else {
                    continue;
                };
                if !found.contains_key(&info.id) {
                    order.push(info.id);
                }
                found.entry(info.id).or_default().extend(info.addrs);
            }
            if let Err(e) = self.upsert_profile(profile, None) {
                tracing::debug!("error storing peer profile: {}", e);
            }
        }

        Ok(order
            .into_iter()
            .map(|id| PeerInfo::new(id, found.remove(&id).unwrap_or_default()))
            .collect())
    }

    /// Tell every connected qri peer that this node is online
    pub async fn announce_connected(self: &Arc<Self>) -> Result<(), P2PError> {
        let pids = self.connected_qri_peer_ids();
        tracing::debug!("Announcing connection to {} peers", pids.len());

        let msg = Message::new(self.id(), MsgType::Connected, Value::Null).with_hang_up();
        self.send_message(&msg, None, &pids).await
    }

    /// Profiles of connected peers, keyed by profile id, each carrying
    /// dialable addresses
    pub fn connected_qri_profiles(&self) -> HashMap<crate::repo::ProfileId, Profile> {
        let mut profiles = HashMap::new();
        let Ok(host) = self.host() else {
            return profiles;
        };

        for pid in self.peers() {
            let Ok(mut profile) = self.repo().profiles().peer_profile(&pid) else {
                continue;
            };

            let mut addrs = host.peerstore().addrs(&pid);
            if addrs.is_empty() {
                addrs = host
                    .conns_to_peer(&pid)
                    .into_iter()
                    .map(|c| c.remote_addr)
                    .collect();
            }

            profile.network_addrs = addrs.iter().map(|a| encapsulate(a, pid)).collect();
            profile.online = true;
            profiles.insert(profile.id.clone(), profile);
        }
        profiles
    }

    /// Connected peers that belong to a known profile
    pub fn connected_qri_peer_ids(&self) -> Vec<PeerId> {
        self.peers()
            .into_iter()
            .filter(|pid| self.repo().profiles().peer_profile(pid).is_ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::test_utils::make_test_node;
    use crate::p2p::{MemoryNetwork, Transport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_profile() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        let profile = a.request_profile(b.id()).await.unwrap();
        assert_eq!(profile.peername, "bob");
        assert!(profile.peer_ids.contains(&b.id()));

        // both sides learned about each other
        let stored = a.repo().profiles().peer_profile(&b.id()).unwrap();
        assert_eq!(stored.peername, "bob");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = b.repo().profiles().peer_profile(&a.id()).unwrap();
        assert_eq!(stored.peername, "alice");
        assert!(stored.online);
    }

    #[tokio::test]
    async fn test_request_qri_peers() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;
        let (c, c_host) = make_test_node(&network, "carol").await;

        b.request_profile(c.id()).await.unwrap();

        let peers = a.request_qri_peers(b.id()).await.unwrap();
        let carol = peers.iter().find(|p| p.id == c.id()).unwrap();
        assert_eq!(carol.addrs, vec![c_host.addr().clone()]);

        // carol's profile is now known to alice too
        let id = a.repo().profiles().peername_id("carol").unwrap();
        assert_eq!(a.repo().profiles().peer_ids(&id).unwrap(), vec![c.id()]);
    }

    #[tokio::test]
    async fn test_connected_qri_profiles() {
        let network = MemoryNetwork::new();
        let (a, a_host) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;
        let (c, _) = make_test_node(&network, "carol").await;

        a.request_profile(b.id()).await.unwrap();
        // connected but never exchanged profiles
        a_host.connect(&PeerInfo::new(c.id(), vec![])).await.unwrap();

        assert_eq!(a.connected_qri_peer_ids(), vec![b.id()]);

        let profiles = a.connected_qri_profiles();
        assert_eq!(profiles.len(), 1);
        let bob = profiles.values().next().unwrap();
        assert_eq!(bob.peername, "bob");
        assert!(bob.network_addrs.iter().all(|a| PeerInfo::from_multiaddr(a).unwrap().id == b.id()));
    }

    #[tokio::test]
    async fn test_connected_announcement_adds_peer() {
        let network = MemoryNetwork::new();
        let (a, a_host) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        let bob = b.repo().profile().unwrap();
        a.upsert_profile(bob, Some(b.id())).unwrap();
        a_host.connect(&PeerInfo::new(b.id(), vec![])).await.unwrap();
        assert!(b.repo().profiles().peer_profile(&a.id()).is_err());

        a.announce_connected().await.unwrap();

        // bob requests alice's profile in the background
        let mut known = false;
        for _ in 0..50 {
            if b.repo().profiles().peer_profile(&a.id()).is_ok() {
                known = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(known);
    }
}
