//! Peer resolution, reputation and connection management

use super::{P2PError, PeerInfo, QriNode};
use crate::repo::{Profile, ProfileId};

use libp2p::{Multiaddr, PeerId};
use std::collections::HashSet;
use std::sync::Arc;

/// Peerstore tag holding a peer's reputation score
pub const REPUTATION_TAG: &str = "qri-reputation";

/// Score given to a peer the first time it is seen
pub const BASELINE_REPUTATION: i64 = 1;

/// Loose description of a peer to connect to
///
/// Resolution honours the first field set, in order: `multiaddr`,
/// `peer_id`, `profile_id`, `peername`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConnectionParams {
    pub peername: Option<String>,
    pub profile_id: Option<ProfileId>,
    pub peer_id: Option<PeerId>,
    /// Must end in `/p2p/<peer id>`
    pub multiaddr: Option<Multiaddr>,
}

impl PeerConnectionParams {
    pub fn from_multiaddr(addr: Multiaddr) -> Self {
        Self {
            multiaddr: Some(addr),
            ..Default::default()
        }
    }

    pub fn from_peer_id(peer_id: PeerId) -> Self {
        Self {
            peer_id: Some(peer_id),
            ..Default::default()
        }
    }

    pub fn from_peername(peername: impl Into<String>) -> Self {
        Self {
            peername: Some(peername.into()),
            ..Default::default()
        }
    }
}

impl QriNode {
    /// Turn connection parameters into a dialable peer descriptor
    pub async fn resolve_peer_info(
        &self,
        params: &PeerConnectionParams,
    ) -> Result<PeerInfo, P2PError> {
        if let Some(addr) = &params.multiaddr {
            return PeerInfo::from_multiaddr(addr);
        }

        if let Some(pid) = params.peer_id {
            return self.get_peer_info(pid).await;
        }

        let profile_id = match (&params.profile_id, &params.peername) {
            (Some(id), _) => id.clone(),
            (None, Some(peername)) => self.repo().profiles().peername_id(peername)?,
            (None, None) => {
                return Err(P2PError::InvalidParams(
                    "one of multiaddr, peer id, profile id or peername is required".into(),
                ))
            }
        };

        let peer_ids = self.repo().profiles().peer_ids(&profile_id)?;
        let pid = peer_ids
            .first()
            .copied()
            .ok_or_else(|| P2PError::NoNetworkInfo(profile_id.to_string()))?;
        self.get_peer_info(pid).await
    }

    /// Address book first, routing lookup only when nothing is known
    pub async fn get_peer_info(&self, pid: PeerId) -> Result<PeerInfo, P2PError> {
        let host = self.host()?;
        let info = host.peerstore().peer_info(&pid);
        if !info.addrs.is_empty() {
            return Ok(info);
        }
        host.find_peer(&pid).await
    }

    /// Connected peers to ask about a profile's data
    ///
    /// The profile's own connected peer ids, in profile-store order. When
    /// none of them is connected, up to `max` connected peers of any kind.
    pub fn closest_connected_peers(&self, profile_id: &ProfileId, max: usize) -> Vec<PeerId> {
        if !self.is_online() {
            return vec![];
        }
        let Ok(host) = self.host() else {
            return vec![];
        };

        let mut pids: Vec<PeerId> = self
            .repo()
            .profiles()
            .peer_ids(profile_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|pid| !host.conns_to_peer(pid).is_empty())
            .collect();

        if pids.is_empty() {
            pids = self.peers().into_iter().take(max).collect();
        }
        pids
    }

    /// Fold the registry's reputation for `profile` into its peers' scores,
    /// disconnecting the whole profile if any score is negative
    ///
    /// The registry is asked at most once per profile per process: once any
    /// of the profile's peers has moved off the baseline it is considered
    /// checked. Tag reads and writes are not atomic together; concurrent
    /// checks of one profile resolve last-writer-wins. A zero delta leaves
    /// the profile at baseline, so it is looked up again next time.
    pub async fn check_reputation(&self, profile: &Profile) -> Result<(), P2PError> {
        let host = self.host()?;
        let peerstore = host.peerstore();

        let mut checked = false;
        let mut negative = false;
        for pid in &profile.peer_ids {
            let rep = match peerstore.get_tag(pid, REPUTATION_TAG) {
                Some(rep) => rep,
                None => {
                    peerstore.set_tag(*pid, REPUTATION_TAG, BASELINE_REPUTATION);
                    BASELINE_REPUTATION
                }
            };
            checked |= rep != BASELINE_REPUTATION;
            negative |= rep < 0;
        }

        if !checked {
            let registry = self.registry().ok_or(P2PError::NoRegistry)?;
            let delta = registry.reputation(&profile.id).await?;
            tracing::debug!("Registry reputation of {} is {}", profile.id, delta);

            for pid in &profile.peer_ids {
                let rep = peerstore
                    .get_tag(pid, REPUTATION_TAG)
                    .unwrap_or(BASELINE_REPUTATION)
                    + delta;
                peerstore.set_tag(*pid, REPUTATION_TAG, rep);
                negative |= rep < 0;
            }
        }

        if negative {
            tracing::info!("Disconnecting {}: negative reputation", profile.id);
            return self.disconnect_peers(&profile.peer_ids).await;
        }
        Ok(())
    }

    /// Cached reputation score of a peer
    pub fn reputation(&self, pid: &PeerId) -> Option<i64> {
        self.host()
            .ok()
            .and_then(|h| h.peerstore().get_tag(pid, REPUTATION_TAG))
    }

    /// Exchange profiles with a newly connected peer, then check its
    /// reputation and ask it for more peers in the background
    pub async fn add_qri_peer(self: &Arc<Self>, info: PeerInfo) -> Result<Profile, P2PError> {
        let profile = self.request_profile(info.id).await?;

        let node = self.clone();
        let checked = profile.clone();
        tokio::spawn(async move {
            if let Err(e) = node.check_reputation(&checked).await {
                tracing::debug!("error checking reputation of {}: {}", checked.id, e);
            }
        });

        let node = self.clone();
        let pid = info.id;
        tokio::spawn(async move {
            match node.request_qri_peers(pid).await {
                Ok(peers) => node.request_new_peers(peers).await,
                Err(e) => tracing::debug!("error requesting peers of {}: {}", pid, e),
            }
        });

        Ok(profile)
    }

    /// Resolve, dial and exchange profiles with a peer
    pub async fn connect_to_peer(
        self: &Arc<Self>,
        params: &PeerConnectionParams,
    ) -> Result<Profile, P2PError> {
        let info = self.resolve_peer_info(params).await?;
        let host = self.host()?;

        if !info.addrs.is_empty() {
            host.peerstore().add_addrs(info.id, info.addrs.clone());
        }
        host.connect(&info).await?;

        self.add_qri_peer(info).await
    }

    pub async fn disconnect_from_peer(&self, pid: &PeerId) -> Result<(), P2PError> {
        self.host()?.close_peer(pid).await
    }

    /// Close connections to every peer id of a profile
    pub async fn disconnect_from_profile(&self, profile_id: &ProfileId) -> Result<(), P2PError> {
        let peer_ids = self.repo().profiles().peer_ids(profile_id)?;
        self.disconnect_peers(&peer_ids).await
    }

    /// Attempt every peer, returning the first failure
    async fn disconnect_peers(&self, pids: &[PeerId]) -> Result<(), P2PError> {
        let mut first_err = None;
        for pid in pids {
            if let Err(e) = self.disconnect_from_peer(pid).await {
                tracing::debug!("error disconnecting {}: {}", pid, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Unique ids of currently connected peers
    pub fn peers(&self) -> Vec<PeerId> {
        let Ok(host) = self.host() else {
            return vec![];
        };

        let mut seen = HashSet::new();
        host.connections()
            .into_iter()
            .map(|c| c.remote_peer)
            .filter(|pid| seen.insert(*pid))
            .collect()
    }

    /// Connected peers as display strings, with their reputation
    pub fn connected_peers(&self) -> Vec<String> {
        self.peers()
            .into_iter()
            .map(|pid| match self.reputation(&pid) {
                Some(rep) => format!("{} (reputation {})", pid, rep),
                None => pid.to_string(),
            })
            .collect()
    }

    /// Address book entry for a peer; empty while offline
    pub fn peer_info(&self, pid: PeerId) -> PeerInfo {
        if !self.is_online() {
            return PeerInfo::new(pid, vec![]);
        }
        match self.host() {
            Ok(host) => host.peerstore().peer_info(&pid),
            Err(_) => PeerInfo::new(pid, vec![]),
        }
    }

    /// Peers not yet connected, excluding this node
    pub fn peer_difference(&self, peers: Vec<PeerInfo>) -> Vec<PeerInfo> {
        let local = self.id();
        let mut connected: HashSet<PeerId> = self.peers().into_iter().collect();
        peers
            .into_iter()
            .filter(|p| p.id != local && connected.insert(p.id))
            .collect()
    }
}
