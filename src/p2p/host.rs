//! libp2p-backed transport
//!
//! The swarm runs on its own task and is driven through a command channel.
//! Connection and listen state is mirrored into shared maps so the node can
//! list connections without a round-trip to the swarm task.

use super::{BoxedStream, Connection, P2PError, PeerInfo, PeerStore, StreamHandler, Transport};
use crate::config::P2PConfig;
use crate::identity::NodeIdentity;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore, Mode},
    mdns, noise,
    swarm::{behaviour::toggle::Toggle, dial_opts::DialOpts, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm, SwarmBuilder,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::FuturesAsyncReadCompatExt;

const IDENTIFY_PROTOCOL_VERSION: &str = "/qri/0.1.0";
const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/qri/kad/1.0.0");

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct QriBehaviour {
    /// Kademlia DHT for routing lookups
    pub kademlia: kad::Behaviour<MemoryStore>,

    /// mDNS for local network discovery
    pub mdns: Toggle<mdns::tokio::Behaviour>,

    /// Identify protocol for peer addresses
    pub identify: identify::Behaviour,

    /// Raw protocol streams
    pub stream: libp2p_stream::Behaviour,
}

enum Command {
    Dial {
        info: PeerInfo,
        reply: oneshot::Sender<Result<(), P2PError>>,
    },
    Disconnect {
        peer: PeerId,
        reply: oneshot::Sender<()>,
    },
    FindPeer {
        peer: PeerId,
        reply: oneshot::Sender<Result<PeerInfo, P2PError>>,
    },
    Shutdown,
}

#[derive(Debug, Default)]
struct HostState {
    listen_addrs: Vec<Multiaddr>,
    connections: HashMap<PeerId, Vec<Multiaddr>>,
}

/// Transport over a libp2p swarm
pub struct Libp2pHost {
    local_peer_id: PeerId,
    peerstore: PeerStore,
    control: libp2p_stream::Control,
    command_tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<HostState>>,
    discovered: Mutex<Option<mpsc::UnboundedReceiver<PeerInfo>>>,
}

impl Libp2pHost {
    /// Build the swarm, start listening and spawn the swarm task
    pub async fn start(identity: &NodeIdentity, config: &P2PConfig) -> Result<Arc<Self>, P2PError> {
        let local_peer_id = identity.peer_id();
        tracing::info!("Creating libp2p host with PeerId: {}", local_peer_id);

        let mut swarm = Self::build_swarm(identity.keypair().clone(), config)?;

        for addr in &config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| P2PError::Transport(e.to_string()))?;
        }

        for addr in &config.bootstrap_addrs {
            if let Ok(info) = PeerInfo::from_multiaddr(addr) {
                for a in info.addrs {
                    swarm.behaviour_mut().kademlia.add_address(&info.id, a);
                }
            }
        }

        let control = swarm.behaviour().stream.new_control();
        let peerstore = PeerStore::new();
        let state = Arc::new(RwLock::new(HostState::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();

        let driver = SwarmDriver {
            swarm,
            commands: command_rx,
            peerstore: peerstore.clone(),
            state: state.clone(),
            discovered: discovered_tx,
            pending_dials: HashMap::new(),
            pending_lookups: HashMap::new(),
        };
        tokio::spawn(driver.run());

        Ok(Arc::new(Self {
            local_peer_id,
            peerstore,
            control,
            command_tx,
            state,
            discovered: Mutex::new(Some(discovered_rx)),
        }))
    }

    /// Build the libp2p swarm with all protocols
    fn build_swarm(keypair: Keypair, config: &P2PConfig) -> Result<Swarm<QriBehaviour>, P2PError> {
        let enable_mdns = config.enable_mdns;
        let idle_timeout = config.idle_connection_timeout();

        let swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| P2PError::InitializationFailed(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| build_behaviour(keypair, enable_mdns))
            .map_err(|e| P2PError::InitializationFailed(e.to_string()))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
            .build();

        Ok(swarm)
    }

    async fn command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, P2PError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .map_err(|_| P2PError::Transport("swarm task has stopped".into()))?;
        rx.await
            .map_err(|_| P2PError::Transport("swarm task dropped the request".into()))
    }
}

fn build_behaviour(
    keypair: &Keypair,
    enable_mdns: bool,
) -> Result<QriBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    let peer_id = PeerId::from(keypair.public());

    let kademlia = {
        let store = MemoryStore::new(peer_id);
        let mut config = kad::Config::new(KAD_PROTOCOL);
        config.set_query_timeout(Duration::from_secs(60));
        let mut behaviour = kad::Behaviour::with_config(peer_id, store, config);
        behaviour.set_mode(Some(Mode::Server));
        behaviour
    };

    let mdns = if enable_mdns {
        Some(mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)?)
    } else {
        None
    };

    let identify = identify::Behaviour::new(
        identify::Config::new(IDENTIFY_PROTOCOL_VERSION.to_string(), keypair.public())
            .with_agent_version(format!("qri/{}", env!("CARGO_PKG_VERSION"))),
    );

    Ok(QriBehaviour {
        kademlia,
        mdns: Toggle::from(mdns),
        identify,
        stream: libp2p_stream::Behaviour::new(),
    })
}

#[async_trait]
impl Transport for Libp2pHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.state.read().listen_addrs.clone()
    }

    fn peerstore(&self) -> &PeerStore {
        &self.peerstore
    }

    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: StreamHandler,
    ) -> Result<(), P2PError> {
        let mut incoming = self
            .control
            .clone()
            .accept(protocol.clone())
            .map_err(|e| P2PError::InitializationFailed(e.to_string()))?;

        tokio::spawn(async move {
            tracing::info!("Accepting inbound streams for {}", protocol);
            while let Some((peer, stream)) = incoming.next().await {
                tracing::debug!("Inbound {} stream from {}", protocol, peer);
                handler(peer, Box::new(stream.compat()));
            }
        });
        Ok(())
    }

    async fn connect(&self, info: &PeerInfo) -> Result<(), P2PError> {
        let info = info.clone();
        self.command(|reply| Command::Dial { info, reply }).await?
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<BoxedStream, P2PError> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, protocol)
            .await
            .map_err(|e| P2PError::Transport(format!("error opening stream: {}", e)))?;
        Ok(Box::new(stream.compat()))
    }

    fn connections(&self) -> Vec<Connection> {
        self.state
            .read()
            .connections
            .iter()
            .flat_map(|(peer, addrs)| {
                addrs.iter().map(move |addr| Connection {
                    remote_peer: *peer,
                    remote_addr: addr.clone(),
                })
            })
            .collect()
    }

    async fn close_peer(&self, peer: &PeerId) -> Result<(), P2PError> {
        let peer = *peer;
        self.command(|reply| Command::Disconnect { peer, reply }).await
    }

    async fn find_peer(&self, peer: &PeerId) -> Result<PeerInfo, P2PError> {
        let peer = *peer;
        self.command(|reply| Command::FindPeer { peer, reply }).await?
    }

    fn take_discovered_peers(&self) -> Option<mpsc::UnboundedReceiver<PeerInfo>> {
        self.discovered.lock().take()
    }

    async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

/// Owns the swarm and applies commands to it
struct SwarmDriver {
    swarm: Swarm<QriBehaviour>,
    commands: mpsc::UnboundedReceiver<Command>,
    peerstore: PeerStore,
    state: Arc<RwLock<HostState>>,
    discovered: mpsc::UnboundedSender<PeerInfo>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), P2PError>>>>,
    pending_lookups: HashMap<kad::QueryId, (PeerId, oneshot::Sender<Result<PeerInfo, P2PError>>)>,
}

impl SwarmDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        tracing::info!("Swarm task for {} stopped", self.swarm.local_peer_id());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { info, reply } => {
                if self.state.read().connections.contains_key(&info.id) {
                    let _ = reply.send(Ok(()));
                    return;
                }

                for addr in &info.addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&info.id, addr.clone());
                }

                let opts = DialOpts::peer_id(info.id).addresses(info.addrs.clone()).build();
                match self.swarm.dial(opts) {
                    Ok(()) => self.pending_dials.entry(info.id).or_default().push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(P2PError::ConnectionFailed(e.to_string())));
                    }
                }
            }

            Command::Disconnect { peer, reply } => {
                // not being connected counts as success
                let _ = self.swarm.disconnect_peer_id(peer);
                let _ = reply.send(());
            }

            Command::FindPeer { peer, reply } => {
                let query = self.swarm.behaviour_mut().kademlia.get_closest_peers(peer);
                self.pending_lookups.insert(query, (peer, reply));
            }

            Command::Shutdown => {}
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<QriBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!("Listening on {}", address);
                self.state.write().listen_addrs.push(address);
            }

            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.state.write().listen_addrs.retain(|a| *a != address);
            }

            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                tracing::debug!("Connected to {}", peer_id);
                let addr = endpoint.get_remote_address().clone();
                if endpoint.is_dialer() {
                    self.peerstore.add_addrs(peer_id, [addr.clone()]);
                }
                self.state
                    .write()
                    .connections
                    .entry(peer_id)
                    .or_default()
                    .push(addr);

                for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Ok(()));
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                endpoint,
                num_established,
                ..
            } => {
                tracing::debug!("Disconnected from {}", peer_id);
                let mut state = self.state.write();
                if num_established == 0 {
                    state.connections.remove(&peer_id);
                } else if let Some(addrs) = state.connections.get_mut(&peer_id) {
                    let addr = endpoint.get_remote_address();
                    if let Some(pos) = addrs.iter().position(|a| a == addr) {
                        addrs.remove(pos);
                    }
                }
            }

            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                tracing::debug!("Dial to {} failed: {}", peer_id, error);
                for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Err(P2PError::ConnectionFailed(format!(
                        "host connect {} failure: {}",
                        peer_id, error
                    ))));
                }
            }

            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),

            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: QriBehaviourEvent) {
        match event {
            QriBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
                let mut found: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in peers {
                    tracing::debug!("mDNS discovered: {} at {}", peer_id, addr);
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                    found.entry(peer_id).or_default().push(addr);
                }
                for (peer_id, addrs) in found {
                    self.peerstore.add_addrs(peer_id, addrs.clone());
                    let _ = self.discovered.send(PeerInfo::new(peer_id, addrs));
                }
            }

            QriBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                tracing::debug!(
                    "Identified peer {}: {} ({})",
                    peer_id,
                    info.agent_version,
                    info.protocol_version
                );

                for addr in &info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
                self.peerstore.add_addrs(peer_id, info.listen_addrs);
            }

            QriBehaviourEvent::Kademlia(kad::Event::RoutingUpdated {
                peer, addresses, ..
            }) => {
                self.peerstore.add_addrs(peer, addresses.into_vec());
            }

            QriBehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id,
                result: kad::QueryResult::GetClosestPeers(result),
                ..
            }) => {
                let Some((peer, reply)) = self.pending_lookups.remove(&id) else {
                    return;
                };

                let closest = match result {
                    Ok(ok) => ok.peers,
                    Err(kad::GetClosestPeersError::Timeout { peers, .. }) => peers,
                };
                let addrs = closest
                    .into_iter()
                    .find(|p| p.peer_id == peer)
                    .map(|p| p.addrs)
                    .unwrap_or_default();
                if !addrs.is_empty() {
                    self.peerstore.add_addrs(peer, addrs);
                }

                let info = self.peerstore.peer_info(&peer);
                let result = if info.addrs.is_empty() {
                    Err(P2PError::PeerNotFound(peer.to_string()))
                } else {
                    Ok(info)
                };
                let _ = reply.send(result);
            }

            _ => {}
        }
    }
}
