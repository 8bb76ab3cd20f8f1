//! Shared fixtures for node tests

use super::{MemoryHost, MemoryNetwork, QriNode};
use crate::config::{Config, P2PConfig};
use crate::identity::NodeIdentity;
use crate::registry::{Registry, RegistryError};
use crate::repo::{MemRepo, Profile, ProfileId};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registry answering every lookup with a fixed delta, counting calls
pub struct MockRegistry {
    delta: i64,
    fail: bool,
    calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new(delta: i64) -> Arc<Self> {
        Arc::new(Self {
            delta,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            delta: 0,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn reputation(&self, _profile_id: &ProfileId) -> Result<i64, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RegistryError::Unavailable("mock registry is down".into()));
        }
        Ok(self.delta)
    }
}

/// Online node on `network` with a fresh identity and profile `Qm<peername>`
pub async fn make_test_node(network: &MemoryNetwork, peername: &str) -> (Arc<QriNode>, Arc<MemoryHost>) {
    node_with_config(network, peername, P2PConfig::default()).await
}

pub async fn node_with_config(
    network: &MemoryNetwork,
    peername: &str,
    mut p2p: P2PConfig,
) -> (Arc<QriNode>, Arc<MemoryHost>) {
    let identity = NodeIdentity::generate();
    p2p.enabled = true;
    p2p.peer_id = None;
    p2p.private_key = Some(identity.to_base64().unwrap());
    p2p.enable_mdns = false;
    p2p.read_timeout_secs = 5;
    p2p.request_timeout_secs = 5;

    let config = Config {
        p2p,
        registry: None,
    };
    let profile = Profile::new(ProfileId::new(format!("Qm{}", peername)), peername);
    let node = QriNode::new(Arc::new(MemRepo::new(profile)), &config).unwrap();

    let host = network.add_host(node.id());
    node.set_host(host.clone());
    node.connect().await.unwrap();
    (node, host)
}
