//! Qri node: lifecycle, stream engine and inbound message fan-out

use super::handlers::{make_handlers, HandlerFunc};
use super::{
    BoxedStream, Libp2pHost, Message, MsgType, P2PError, Transport, WrappedStream,
};
use crate::config::{Config, P2PConfig};
use crate::identity::NodeIdentity;
use crate::registry::{HttpRegistry, Registry};
use crate::repo::Repo;

use libp2p::{Multiaddr, PeerId, StreamProtocol};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Protocol id the node registers on its transport
pub const QRI_PROTOCOL_ID: StreamProtocol = StreamProtocol::new("/qri/0.1.0");

const LISTENER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Offline,
    Connecting,
    Online,
    /// Terminal; a closed node cannot reconnect
    Closed,
}

/// Listener handle returned by [`QriNode::receive_messages`]
///
/// Each subscription receives every message the node reads after it was
/// created. Dropping it unregisters the listener.
pub struct MessageSubscription {
    rx: mpsc::Receiver<Message>,
}

impl MessageSubscription {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// A peer on the qri network
pub struct QriNode {
    identity: NodeIdentity,
    cfg: P2PConfig,
    repo: Arc<dyn Repo>,
    registry: RwLock<Option<Arc<dyn Registry>>>,
    state: RwLock<NodeState>,
    state_changed: Notify,
    host: RwLock<Option<Arc<dyn Transport>>>,
    handlers: HashMap<MsgType, HandlerFunc>,

    /// Every message read by any receive loop goes through here
    msg_tx: mpsc::UnboundedSender<Message>,
    msg_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    receivers: RwLock<Vec<mpsc::Sender<Message>>>,

    shutdown: CancellationToken,
}

impl QriNode {
    /// Create an offline node
    pub fn new(repo: Arc<dyn Repo>, config: &Config) -> crate::Result<Arc<Self>> {
        let identity = config.p2p.decode_identity()?;

        let registry: Option<Arc<dyn Registry>> = match config.registry_location() {
            "" => None,
            location => Some(Arc::new(HttpRegistry::new(location)?)),
        };

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        tracing::info!("Created qri node {}", identity.peer_id());

        Ok(Arc::new(Self {
            identity,
            cfg: config.p2p.clone(),
            repo,
            registry: RwLock::new(registry),
            state: RwLock::new(NodeState::Offline),
            state_changed: Notify::new(),
            host: RwLock::new(None),
            handlers: make_handlers(),
            msg_tx,
            msg_rx: Mutex::new(Some(msg_rx)),
            receivers: RwLock::new(vec![]),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Peer id of this node; the transport's id once one is attached
    pub fn id(&self) -> PeerId {
        self.host
            .read()
            .as_ref()
            .map(|h| h.local_peer_id())
            .unwrap_or_else(|| self.identity.peer_id())
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn is_online(&self) -> bool {
        self.state() == NodeState::Online
    }

    pub fn config(&self) -> &P2PConfig {
        &self.cfg
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    pub fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.registry.read().clone()
    }

    /// Replace the registry used for reputation lookups
    pub fn set_registry(&self, registry: Option<Arc<dyn Registry>>) {
        *self.registry.write() = registry;
    }

    /// Attach a transport before [`QriNode::connect`]; it is used instead of
    /// building a libp2p host
    pub fn set_host(&self, host: Arc<dyn Transport>) {
        *self.host.write() = Some(host);
    }

    pub fn host(&self) -> Result<Arc<dyn Transport>, P2PError> {
        self.host.read().clone().ok_or(P2PError::Offline)
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bring the node online
    ///
    /// A caller arriving while another connect is in flight waits for it to
    /// settle and takes over if it failed.
    pub async fn connect(self: &Arc<Self>) -> Result<(), P2PError> {
        if !self.cfg.enabled {
            return Err(P2PError::Disabled);
        }

        loop {
            let changed = self.state_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.state.write();
                match *state {
                    NodeState::Closed => return Err(P2PError::Closed),
                    NodeState::Online => return Ok(()),
                    NodeState::Connecting => {}
                    NodeState::Offline => {
                        *state = NodeState::Connecting;
                        break;
                    }
                }
            }
            changed.await;
        }

        let result = self.go_online().await;
        let closed = {
            let mut state = self.state.write();
            let closed = *state == NodeState::Closed;
            if !closed {
                *state = if result.is_ok() {
                    NodeState::Online
                } else {
                    NodeState::Offline
                };
            }
            closed
        };
        self.state_changed.notify_waiters();
        result?;
        if closed {
            return Err(P2PError::Closed);
        }

        self.spawn_fan_out();
        tracing::info!("Node {} is online", self.id());
        Ok(())
    }

    async fn go_online(self: &Arc<Self>) -> Result<(), P2PError> {
        let existing = self.host.read().clone();
        let host = match existing {
            Some(host) => host,
            None => {
                let host = self.acquire_host().await?;
                *self.host.write() = Some(host.clone());
                host
            }
        };

        self.publish_addresses()?;

        // inbound streams are served only once nothing else can fail
        let node = Arc::downgrade(self);
        let read_timeout = self.cfg.read_timeout();
        host.set_stream_handler(
            QRI_PROTOCOL_ID,
            Arc::new(move |peer: PeerId, stream: BoxedStream| {
                let Some(node) = node.upgrade() else {
                    return;
                };
                tracing::debug!("Inbound stream from {}", peer);
                let ws = WrappedStream::new(stream, read_timeout);
                tokio::spawn(node.handle_stream(ws, None));
            }),
        )
    }

    /// Adopt the store's host when the store opts in, otherwise start one
    async fn acquire_host(&self) -> Result<Arc<dyn Transport>, P2PError> {
        let store = self.repo.store();
        if let Some(onlineable) = store.as_onlineable() {
            if !onlineable.is_online() {
                onlineable.go_online().await?;
            }
            if let Some(host) = onlineable.transport() {
                tracing::info!("Using the object store's network host");
                return Ok(host);
            }
        }

        let host: Arc<dyn Transport> = Libp2pHost::start(&self.identity, &self.cfg).await?;
        Ok(host)
    }

    /// Record this node's peer id and addresses in the local profile
    pub(crate) fn publish_addresses(&self) -> Result<(), P2PError> {
        let host = self.host()?;
        let mut profile = self.repo.profile()?;
        profile.peer_ids = vec![host.local_peer_id()];
        profile.network_addrs = self.encapsulated_addresses()?;
        self.repo.set_profile(profile)?;
        Ok(())
    }

    pub fn listen_addresses(&self) -> Result<Vec<Multiaddr>, P2PError> {
        Ok(self.host()?.listen_addrs())
    }

    /// Listen addresses with `/p2p/<id>` appended
    pub fn encapsulated_addresses(&self) -> Result<Vec<Multiaddr>, P2PError> {
        let host = self.host()?;
        let id = host.local_peer_id();
        Ok(host
            .listen_addrs()
            .iter()
            .map(|a| super::transport::encapsulate(a, id))
            .collect())
    }

    /// Register a new listener for inbound messages
    ///
    /// On a closed node the subscription is already finished.
    pub fn receive_messages(&self) -> MessageSubscription {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let mut receivers = self.receivers.write();
        if !self.shutdown.is_cancelled() {
            receivers.push(tx);
        }
        MessageSubscription { rx }
    }

    fn spawn_fan_out(self: &Arc<Self>) {
        let Some(mut rx) = self.msg_rx.lock().take() else {
            return;
        };
        let node = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let Some(node) = node.upgrade() else {
                    break;
                };
                node.broadcast(msg);
            }
            tracing::debug!("Message fan-out stopped");
        });
    }

    /// Deliver to every listener, each on its own task
    fn broadcast(&self, msg: Message) {
        let mut receivers = self.receivers.write();
        receivers.retain(|tx| !tx.is_closed());
        for tx in receivers.iter() {
            let tx = tx.clone();
            let msg = msg.clone();
            tokio::spawn(async move {
                let _ = tx.send(msg).await;
            });
        }
    }

    /// Receive loop for one stream
    ///
    /// Runs until the remote closes the stream, a receive fails, a message
    /// of unknown type arrives, a handler asks to hang up, a message carries
    /// `hang_up`, or the node closes.
    pub(crate) async fn handle_stream(
        self: Arc<Self>,
        mut ws: WrappedStream,
        replies: Option<mpsc::UnboundedSender<Message>>,
    ) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = ws.receive_message() => received,
            };

            let msg = match received {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("error receiving message: {}", e);
                    break;
                }
            };

            if let Some(replies) = &replies {
                let _ = replies.send(msg.clone());
            }
            let _ = self.msg_tx.send(msg.clone());

            let Some(handler) = self.handlers.get(&msg.msg_type).copied() else {
                tracing::info!(
                    "peer {} sent unrecognized message type '{}', hanging up",
                    msg.initiator,
                    msg.msg_type
                );
                break;
            };

            let hang_up = msg.hang_up;
            if handler(&self, &mut ws, msg).await || hang_up {
                break;
            }
        }

        if let Err(e) = ws.close().await {
            tracing::debug!("error closing stream: {}", e);
        }
    }

    /// Send `msg` to each peer on a fresh stream
    ///
    /// Replies read on those streams are forwarded to `replies`. Returns as
    /// soon as every message is written; it never waits for replies.
    pub async fn send_message(
        self: &Arc<Self>,
        msg: &Message,
        replies: Option<mpsc::UnboundedSender<Message>>,
        pids: &[PeerId],
    ) -> Result<(), P2PError> {
        let host = self.host()?;
        let local = host.local_peer_id();

        for pid in pids {
            if *pid == local {
                continue;
            }

            let stream = host.open_stream(*pid, QRI_PROTOCOL_ID).await?;
            let mut ws = WrappedStream::new(stream, self.cfg.read_timeout());
            ws.send_message(msg).await?;

            tokio::spawn(self.clone().handle_stream(ws, replies.clone()));
        }
        Ok(())
    }

    /// Send `msg` to one peer and wait for the reply with the same id
    pub async fn request(self: &Arc<Self>, pid: PeerId, msg: Message) -> Result<Message, P2PError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.send_message(&msg, Some(tx), &[pid]).await?;

        let wait = async {
            while let Some(reply) = rx.recv().await {
                if reply.id == msg.id {
                    return Some(reply);
                }
            }
            None
        };

        match tokio::time::timeout(self.cfg.request_timeout(), wait).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(P2PError::Protocol(format!(
                "{} closed the stream without replying to {}",
                pid, msg.msg_type
            ))),
            Err(_) => Err(P2PError::Timeout),
        }
    }

    /// Take the node offline for good
    ///
    /// Cancels the fan-out loop and every receive loop, drops all listeners
    /// and shuts the transport down.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == NodeState::Closed {
                return;
            }
            *state = NodeState::Closed;
        }

        self.state_changed.notify_waiters();

        // cancel before clearing so late subscribers see the shutdown
        self.shutdown.cancel();
        self.receivers.write().clear();

        let host = self.host.write().take();
        if let Some(host) = host {
            host.shutdown().await;
        }
        tracing::info!("Node {} closed", self.identity.peer_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::test_utils::make_test_node;
    use crate::p2p::MemoryNetwork;
    use crate::repo::{
        DatasetRef, Event, EventType, MemRepo, Profile, ProfileId, ProfileStore, RepoError,
    };
    use crate::store::{MemStore, Store};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::json;
    use std::time::Duration;

    /// Repository that refuses to change the local profile
    struct ReadOnlyRepo(MemRepo);

    impl Repo for ReadOnlyRepo {
        fn profile(&self) -> Result<Profile, RepoError> {
            self.0.profile()
        }

        fn set_profile(&self, _profile: Profile) -> Result<(), RepoError> {
            Err(RepoError::Other("repository is read only".into()))
        }

        fn profiles(&self) -> &dyn ProfileStore {
            self.0.profiles()
        }

        fn store(&self) -> Arc<dyn Store> {
            self.0.store()
        }

        fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, RepoError> {
            self.0.references(limit, offset)
        }

        fn put_ref(&self, reference: DatasetRef) -> Result<(), RepoError> {
            self.0.put_ref(reference)
        }

        fn resolve_ref(&self, reference: &mut DatasetRef) -> Result<(), RepoError> {
            self.0.resolve_ref(reference)
        }

        fn dataset_log(
            &self,
            reference: &DatasetRef,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<DatasetRef>, RepoError> {
            self.0.dataset_log(reference, limit, offset)
        }

        fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, RepoError> {
            self.0.events(limit, offset)
        }

        fn log_event(&self, event_type: EventType, reference: DatasetRef) -> Result<(), RepoError> {
            self.0.log_event(event_type, reference)
        }
    }

    fn ack_and_keep_reading<'a>(
        _node: &'a Arc<QriNode>,
        ws: &'a mut WrappedStream,
        msg: Message,
    ) -> BoxFuture<'a, bool> {
        async move {
            if let Ok(reply) = msg.reply("ack") {
                let _ = ws.send_message(&reply).await;
            }
            false
        }
        .boxed()
    }

    /// Receive loop of an offline node whose ping handler never hangs up;
    /// returns the other end of the stream
    fn keep_reading_session() -> (WrappedStream, tokio::task::JoinHandle<()>) {
        let repo = Arc::new(MemRepo::new(Profile::new(ProfileId::new("QmKeeper"), "keeper")));
        let mut node = QriNode::new(repo, &Config::default()).unwrap();
        Arc::get_mut(&mut node)
            .unwrap()
            .handlers
            .insert(MsgType::Ping, ack_and_keep_reading);

        let (local, remote) = tokio::io::duplex(64 * 1024);
        let remote = WrappedStream::new(Box::new(remote), Duration::from_secs(30));
        let session = tokio::spawn(node.handle_stream(remote, None));
        (WrappedStream::new(Box::new(local), Duration::from_secs(5)), session)
    }

    fn offline_node(network: &MemoryNetwork) -> Arc<QriNode> {
        let identity = NodeIdentity::generate();
        let mut config = Config::default();
        config.p2p.private_key = Some(identity.to_base64().unwrap());
        let repo = Arc::new(MemRepo::new(Profile::new(ProfileId::new("QmLate"), "late")));

        let node = QriNode::new(repo, &config).unwrap();
        node.set_host(network.add_host(identity.peer_id()));
        node
    }

    async fn recv(sub: &mut MessageSubscription) -> Message {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_publishes_addresses() {
        let network = MemoryNetwork::new();
        let (node, host) = make_test_node(&network, "alice").await;

        assert_eq!(node.state(), NodeState::Online);
        assert_eq!(node.id(), host.local_peer_id());

        let profile = node.repo().profile().unwrap();
        assert_eq!(profile.peer_ids, vec![node.id()]);
        assert_eq!(profile.network_addrs, vec![host.p2p_addr()]);

        // connecting again is a no-op
        node.connect().await.unwrap();
        assert_eq!(node.state(), NodeState::Online);
    }

    #[tokio::test]
    async fn test_adopts_onlineable_store_host() {
        let network = MemoryNetwork::new();
        let identity = NodeIdentity::generate();
        let host = network.add_host(identity.peer_id());

        let store = Arc::new(MemStore::with_transport(host.clone()));
        let repo = Arc::new(MemRepo::with_store(
            Profile::new(ProfileId::new("QmStore"), "store"),
            store.clone(),
        ));

        let mut config = Config::default();
        config.p2p.private_key = Some(identity.to_base64().unwrap());
        let node = QriNode::new(repo, &config).unwrap();
        node.connect().await.unwrap();

        assert!(crate::store::Onlineable::is_online(store.as_ref()));
        assert_eq!(node.id(), host.local_peer_id());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_listener() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        let mut first = b.receive_messages();
        let mut second = b.receive_messages();

        let msg = Message::new(a.id(), MsgType::Ping, json!("ping")).with_hang_up();
        a.send_message(&msg, None, &[b.id()]).await.unwrap();

        assert_eq!(recv(&mut first).await.id, msg.id);
        assert_eq!(recv(&mut second).await.id, msg.id);
    }

    #[tokio::test]
    async fn test_send_to_self_is_skipped() {
        let network = MemoryNetwork::new();
        let (a, host) = make_test_node(&network, "alice").await;
        let mut sub = a.receive_messages();

        let msg = Message::new(a.id(), MsgType::Ping, json!("ping"));
        a.send_message(&msg, None, &[a.id()]).await.unwrap();

        assert_eq!(host.dials(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        let msg = Message::new(a.id(), MsgType::Ping, json!("ping"));
        let reply = a.request(b.id(), msg.clone()).await.unwrap();

        assert_eq!(reply.id, msg.id);
        assert_eq!(reply.initiator, a.id());
        assert!(reply.hang_up);
        assert_eq!(reply.decode_body::<String>().unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_hang_up_closes_stream() {
        let network = MemoryNetwork::new();
        let (a, host) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        let stream = host.open_stream(b.id(), QRI_PROTOCOL_ID).await.unwrap();
        let mut ws = WrappedStream::new(stream, Duration::from_secs(5));

        let msg = Message::new(a.id(), MsgType::Ping, json!("ping")).with_hang_up();
        ws.send_message(&msg).await.unwrap();

        let reply = ws.receive_message().await.unwrap().unwrap();
        assert_eq!(reply.id, msg.id);
        // handler side stops reading and closes after one message
        assert!(ws.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_ends_session() {
        let network = MemoryNetwork::new();
        let (a, host) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;
        let mut sub = b.receive_messages();

        let stream = host.open_stream(b.id(), QRI_PROTOCOL_ID).await.unwrap();
        let mut ws = WrappedStream::new(stream, Duration::from_secs(5));

        let msg = Message::new(a.id(), MsgType::Unknown("gossip".into()), json!({}));
        ws.send_message(&msg).await.unwrap();

        // no handler answers; the remote just hangs up
        assert!(ws.receive_message().await.unwrap().is_none());
        // listeners still see the message
        assert_eq!(recv(&mut sub).await.msg_type, MsgType::Unknown("gossip".into()));
    }

    #[tokio::test]
    async fn test_close() {
        let network = MemoryNetwork::new();
        let (a, host) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        a.close().await;
        assert_eq!(a.state(), NodeState::Closed);
        assert!(matches!(a.host(), Err(P2PError::Offline)));
        assert!(matches!(a.connect().await, Err(P2PError::Closed)));

        // the closed node's protocol handler is gone
        let msg = Message::new(b.id(), MsgType::Ping, json!("ping"));
        assert!(b.request(host.local_peer_id(), msg).await.is_err());
    }

    #[tokio::test]
    async fn test_handler_returning_false_keeps_reading() {
        let (mut ws, session) = keep_reading_session();
        let peer = PeerId::random();

        for _ in 0..2 {
            let msg = Message::new(peer, MsgType::Ping, json!("ping"));
            ws.send_message(&msg).await.unwrap();
            assert_eq!(ws.receive_message().await.unwrap().unwrap().id, msg.id);
        }
        assert!(!session.is_finished());

        // closing our half ends the remote loop
        ws.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_hang_up_flag_overrides_handler() {
        let (mut ws, session) = keep_reading_session();

        let msg = Message::new(PeerId::random(), MsgType::Ping, json!("ping")).with_hang_up();
        ws.send_message(&msg).await.unwrap();
        assert_eq!(ws.receive_message().await.unwrap().unwrap().id, msg.id);

        // the handler asked to keep going, the flag still ends the session
        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert!(ws.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscriptions_end_on_close() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let mut before = a.receive_messages();

        a.close().await;
        let mut after = a.receive_messages();

        let next = tokio::time::timeout(Duration::from_millis(500), before.recv()).await;
        assert!(matches!(next, Ok(None)));
        let next = tokio::time::timeout(Duration::from_millis(500), after.recv()).await;
        assert!(matches!(next, Ok(None)));
    }

    #[tokio::test]
    async fn test_connect_waits_for_connect_in_flight() {
        let network = MemoryNetwork::new();
        let node = offline_node(&network);

        *node.state.write() = NodeState::Connecting;
        let waiter = tokio::spawn({
            let node = node.clone();
            async move { node.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // the other attempt failed; the waiter takes over
        *node.state.write() = NodeState::Offline;
        node.state_changed.notify_waiters();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(node.state(), NodeState::Online);
    }

    #[tokio::test]
    async fn test_close_releases_waiting_connect() {
        let network = MemoryNetwork::new();
        let node = offline_node(&network);

        *node.state.write() = NodeState::Connecting;
        let waiter = tokio::spawn({
            let node = node.clone();
            async move { node.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        node.close().await;
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(P2PError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_connect_serves_no_streams() {
        let network = MemoryNetwork::new();
        let (_b, b_host) = make_test_node(&network, "bob").await;

        let identity = NodeIdentity::generate();
        let mut config = Config::default();
        config.p2p.private_key = Some(identity.to_base64().unwrap());
        let repo = ReadOnlyRepo(MemRepo::new(Profile::new(ProfileId::new("QmRo"), "readonly")));
        let node = QriNode::new(Arc::new(repo), &config).unwrap();
        let host = network.add_host(identity.peer_id());
        node.set_host(host.clone());

        assert!(node.connect().await.is_err());
        assert_eq!(node.state(), NodeState::Offline);
        assert!(b_host
            .open_stream(host.local_peer_id(), QRI_PROTOCOL_ID)
            .await
            .is_err());
    }
}
