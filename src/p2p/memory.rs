//! In-process transport
//!
//! Hosts registered on the same [`MemoryNetwork`] reach each other through
//! in-memory duplex pipes. Useful for embedding several nodes in one
//! process and for exercising the protocol without sockets.

use super::{BoxedStream, Connection, P2PError, PeerInfo, PeerStore, StreamHandler, Transport};

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Registry of hosts that can reach each other
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hosts: Arc<RwLock<HashMap<PeerId, Weak<MemoryHost>>>>,
    next_port: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host for `peer_id`, listening on a fresh `/memory/<n>` address
    pub fn add_host(&self, peer_id: PeerId) -> Arc<MemoryHost> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst) + 1;
        let host = Arc::new(MemoryHost {
            id: peer_id,
            addr: Multiaddr::empty().with(Protocol::Memory(port)),
            network: self.clone(),
            peerstore: PeerStore::new(),
            handlers: RwLock::new(HashMap::new()),
            conns: RwLock::new(HashMap::new()),
            routing_lookups: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
        });
        self.hosts.write().insert(peer_id, Arc::downgrade(&host));
        host
    }

    fn host(&self, peer_id: &PeerId) -> Option<Arc<MemoryHost>> {
        self.hosts.read().get(peer_id).and_then(Weak::upgrade)
    }

    fn remove(&self, peer_id: &PeerId) {
        self.hosts.write().remove(peer_id);
    }
}

/// One host on a [`MemoryNetwork`]
pub struct MemoryHost {
    id: PeerId,
    addr: Multiaddr,
    network: MemoryNetwork,
    peerstore: PeerStore,
    handlers: RwLock<HashMap<StreamProtocol, StreamHandler>>,
    conns: RwLock<HashMap<PeerId, Multiaddr>>,
    routing_lookups: AtomicUsize,
    dials: AtomicUsize,
}

impl MemoryHost {
    pub fn addr(&self) -> &Multiaddr {
        &self.addr
    }

    /// Listen address with `/p2p/<id>` appended
    pub fn p2p_addr(&self) -> Multiaddr {
        self.addr.clone().with(Protocol::P2p(self.id))
    }

    /// Number of routing lookups served so far
    pub fn routing_lookups(&self) -> usize {
        self.routing_lookups.load(Ordering::SeqCst)
    }

    /// Number of dials attempted so far
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.conns.read().contains_key(peer)
    }

    fn link(&self, remote: &MemoryHost) {
        self.conns.write().insert(remote.id, remote.addr.clone());
        self.peerstore.add_addrs(remote.id, [remote.addr.clone()]);
    }

    fn unlink(&self, remote: &PeerId) -> bool {
        self.conns.write().remove(remote).is_some()
    }
}

#[async_trait]
impl Transport for MemoryHost {
    fn local_peer_id(&self) -> PeerId {
        self.id
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        vec![self.addr.clone()]
    }

    fn peerstore(&self) -> &PeerStore {
        &self.peerstore
    }

    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: StreamHandler,
    ) -> Result<(), P2PError> {
        self.handlers.write().insert(protocol, handler);
        Ok(())
    }

    async fn connect(&self, info: &PeerInfo) -> Result<(), P2PError> {
        if info.id == self.id {
            return Err(P2PError::ConnectionFailed("cannot dial self".into()));
        }
        if self.is_connected(&info.id) {
            return Ok(());
        }

        self.dials.fetch_add(1, Ordering::SeqCst);
        let remote = self
            .network
            .host(&info.id)
            .ok_or_else(|| P2PError::ConnectionFailed(format!("no route to {}", info.id)))?;

        self.link(&remote);
        remote.link(self);
        Ok(())
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<BoxedStream, P2PError> {
        if !self.is_connected(&peer) {
            self.connect(&self.peerstore.peer_info(&peer)).await?;
        }

        let remote = self
            .network
            .host(&peer)
            .ok_or_else(|| P2PError::ConnectionFailed(format!("no route to {}", peer)))?;
        let handler = remote
            .handlers
            .read()
            .get(&protocol)
            .cloned()
            .ok_or_else(|| {
                P2PError::Protocol(format!("{} does not support {}", peer, protocol))
            })?;

        let (local, inbound) = tokio::io::duplex(PIPE_CAPACITY);
        handler(self.id, Box::new(inbound));
        Ok(Box::new(local))
    }

    fn connections(&self) -> Vec<Connection> {
        self.conns
            .read()
            .iter()
            .map(|(peer, addr)| Connection {
                remote_peer: *peer,
                remote_addr: addr.clone(),
            })
            .collect()
    }

    async fn close_peer(&self, peer: &PeerId) -> Result<(), P2PError> {
        if self.unlink(peer) {
            if let Some(remote) = self.network.host(peer) {
                remote.unlink(&self.id);
            }
        }
        Ok(())
    }

    async fn find_peer(&self, peer: &PeerId) -> Result<PeerInfo, P2PError> {
        self.routing_lookups.fetch_add(1, Ordering::SeqCst);
        let remote = self
            .network
            .host(peer)
            .ok_or_else(|| P2PError::PeerNotFound(peer.to_string()))?;

        self.peerstore.add_addrs(*peer, [remote.addr.clone()]);
        Ok(PeerInfo::new(*peer, vec![remote.addr.clone()]))
    }

    async fn shutdown(&self) {
        let peers: Vec<PeerId> = self.conns.read().keys().copied().collect();
        for peer in peers {
            let _ = self.close_peer(&peer).await;
        }
        self.handlers.write().clear();
        self.network.remove(&self.id);
    }
}
