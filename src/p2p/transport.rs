//! Transport capability
//!
//! The node never touches sockets directly. Everything it needs from the
//! overlay network (dialing, raw protocol streams, connection listing,
//! routing lookups and the peer address book) goes through [`Transport`].

use super::{P2PError, PeerStore};

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Duplex byte stream negotiated for one protocol
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Called for every inbound stream of a registered protocol
pub type StreamHandler = Arc<dyn Fn(PeerId, BoxedStream) + Send + Sync>;

/// Dialable description of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// Split a `/p2p/<id>`-terminated address into id and transport address
    pub fn from_multiaddr(addr: &Multiaddr) -> Result<Self, P2PError> {
        let mut transport = addr.clone();
        match transport.pop() {
            Some(Protocol::P2p(id)) => {
                let addrs = if transport.is_empty() {
                    vec![]
                } else {
                    vec![transport]
                };
                Ok(Self { id, addrs })
            }
            _ => Err(P2PError::InvalidAddress(format!(
                "{} does not end in a peer id",
                addr
            ))),
        }
    }

    /// Addresses with the peer id appended
    pub fn encapsulated_addrs(&self) -> Vec<Multiaddr> {
        self.addrs
            .iter()
            .map(|a| encapsulate(a, self.id))
            .collect()
    }
}

/// Append `/p2p/<peer>` unless the address already names a peer
pub fn encapsulate(addr: &Multiaddr, peer: PeerId) -> Multiaddr {
    if matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
        addr.clone()
    } else {
        addr.clone().with(Protocol::P2p(peer))
    }
}

/// An open connection to a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub remote_peer: PeerId,
    pub remote_addr: Multiaddr,
}

/// Overlay network capability consumed by the node
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Address book and tag store shared by every connection task
    fn peerstore(&self) -> &PeerStore;

    /// Route inbound streams for `protocol` to `handler`
    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: StreamHandler,
    ) -> Result<(), P2PError>;

    /// Ensure a connection to the peer exists
    async fn connect(&self, info: &PeerInfo) -> Result<(), P2PError>;

    /// Open a new stream to `peer`, dialing if needed
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<BoxedStream, P2PError>;

    fn connections(&self) -> Vec<Connection>;

    fn conns_to_peer(&self, peer: &PeerId) -> Vec<Connection> {
        self.connections()
            .into_iter()
            .filter(|c| c.remote_peer == *peer)
            .collect()
    }

    /// Close every connection to `peer`
    async fn close_peer(&self, peer: &PeerId) -> Result<(), P2PError>;

    /// Distributed routing lookup
    async fn find_peer(&self, peer: &PeerId) -> Result<PeerInfo, P2PError>;

    /// Peers found by local discovery (mDNS and the like); yields a receiver once
    fn take_discovered_peers(&self) -> Option<mpsc::UnboundedReceiver<PeerInfo>> {
        None
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_info_from_multiaddr() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", peer).parse().unwrap();

        let info = PeerInfo::from_multiaddr(&addr).unwrap();
        assert_eq!(info.id, peer);
        assert_eq!(info.addrs, vec!["/ip4/127.0.0.1/tcp/4001".parse::<Multiaddr>().unwrap()]);
        assert_eq!(info.encapsulated_addrs(), vec![addr]);
    }

    #[test]
    fn test_bare_peer_address() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/p2p/{}", peer).parse().unwrap();

        let info = PeerInfo::from_multiaddr(&addr).unwrap();
        assert_eq!(info.id, peer);
        assert!(info.addrs.is_empty());
    }

    #[test]
    fn test_address_without_peer_id() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert!(matches!(
            PeerInfo::from_multiaddr(&addr),
            Err(P2PError::InvalidAddress(_))
        ));
    }
}
