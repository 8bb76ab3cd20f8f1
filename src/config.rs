//! Node configuration
//!
//! The configuration document is plain JSON. Every field has a default so a
//! partial document (or none at all) yields a usable node.

use crate::identity::{IdentityError, NodeIdentity};

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("Configured peer id {configured} does not match private key ({derived})")]
    PeerIdMismatch { configured: String, derived: String },
}

/// Top-level configuration for a Qri node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub p2p: P2PConfig,

    /// Registry used for reputation lookups
    pub registry: Option<RegistryConfig>,
}

impl Config {
    /// Load a configuration document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.p2p.enabled {
            self.p2p.decode_identity()?;
        }
        Ok(())
    }

    /// Registry location, empty when no registry is configured
    pub fn registry_location(&self) -> &str {
        self.registry
            .as_ref()
            .map(|r| r.location.as_str())
            .unwrap_or_default()
    }
}

/// Peer-to-peer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2PConfig {
    /// Administrative switch for the peer protocol
    pub enabled: bool,

    /// Expected peer id (checked against the private key when both are set)
    pub peer_id: Option<String>,

    /// Base64 protobuf-encoded libp2p keypair
    pub private_key: Option<String>,

    /// Listen addresses
    pub listen_addrs: Vec<Multiaddr>,

    /// Peers dialled when online services start
    pub bootstrap_addrs: Vec<Multiaddr>,

    /// Enable mDNS for local network discovery
    pub enable_mdns: bool,

    /// Receive deadline for a single message on an open stream
    pub read_timeout_secs: u64,

    /// How long a request waits for its reply
    pub request_timeout_secs: u64,

    /// Idle connections are closed after this many seconds
    pub idle_connection_timeout_secs: u64,

    /// Cap on new peers dialled after one peer-list exchange
    pub max_peer_requests: usize,
}

impl Default for P2PConfig {
    fn default() -> Self {
        let any = Multiaddr::empty().with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED));
        Self {
            enabled: true,
            peer_id: None,
            private_key: None,
            listen_addrs: vec![
                any.clone().with(Protocol::Tcp(0)),
                any.with(Protocol::Udp(0)).with(Protocol::QuicV1),
            ],
            bootstrap_addrs: vec![],
            enable_mdns: true,
            read_timeout_secs: 120,
            request_timeout_secs: 30,
            idle_connection_timeout_secs: 60,
            max_peer_requests: 10,
        }
    }
}

impl P2PConfig {
    /// Decode the configured identity, or generate a fresh one if no key is set
    pub fn decode_identity(&self) -> Result<NodeIdentity, ConfigError> {
        let identity = match &self.private_key {
            Some(key) => NodeIdentity::from_base64(key)?,
            None => {
                tracing::warn!("No private key configured, generating an ephemeral identity");
                NodeIdentity::generate()
            }
        };

        if let Some(configured) = &self.peer_id {
            let derived = identity.peer_id().to_string();
            if self.private_key.is_some() && *configured != derived {
                return Err(ConfigError::PeerIdMismatch {
                    configured: configured.clone(),
                    derived,
                });
            }
        }

        Ok(identity)
    }

    /// Decode the configured peer id without touching the private key
    pub fn decode_peer_id(&self) -> Option<PeerId> {
        self.peer_id.as_ref().and_then(|id| id.parse().ok())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }
}

/// Registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry, e.g. `https://registry.qri.cloud`
    pub location: String,
}
