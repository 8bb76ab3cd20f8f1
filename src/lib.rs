//! Qri Core - peer-to-peer node for a content-addressed dataset network
//!
//! This crate provides the peer protocol of a dataset-sharing node: the
//! connection lifecycle, a typed message protocol over multiplexed streams,
//! peer resolution, and the reputation checks that gate connectivity.
//! Dataset storage, the local repository and the registry are consumed
//! through capability traits.

pub mod config;
pub mod identity;
pub mod p2p;
pub mod registry;
pub mod repo;
pub mod store;

pub use config::{Config, P2PConfig, RegistryConfig};
pub use p2p::{Message, MsgType, NodeState, PeerConnectionParams, PeerInfo, QriNode};

use thiserror::Error;

/// Main error type for Qri operations
#[derive(Error, Debug)]
pub enum QriError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("P2P network error: {0}")]
    P2P(#[from] p2p::P2PError),

    #[error("Repository error: {0}")]
    Repo(#[from] repo::RepoError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QriError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{MemRepo, Profile, ProfileId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_node() {
        let config = Config::default();
        let repo = Arc::new(MemRepo::new(Profile::new(ProfileId::new("QmTestProfile"), "tester")));
        let node = QriNode::new(repo, &config).unwrap();

        assert_eq!(node.state(), NodeState::Offline);
        assert!(!node.id().to_string().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_node_fails_fast() {
        let mut config = Config::default();
        config.p2p.enabled = false;
        let repo = Arc::new(MemRepo::new(Profile::new(ProfileId::new("QmTestProfile"), "tester")));
        let node = QriNode::new(repo, &config).unwrap();

        let err: QriError = node.connect().await.unwrap_err().into();
        assert!(matches!(err, QriError::P2P(p2p::P2PError::Disabled)));
        assert_eq!(node.state(), NodeState::Offline);
    }
}
