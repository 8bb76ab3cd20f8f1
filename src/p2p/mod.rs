//! P2P Networking Module
//!
//! Implements the qri peer protocol on top of a [`Transport`]: the stream
//! engine and its dispatch table, peer resolution, reputation enforcement,
//! and the node lifecycle.

mod datasets;
mod discovery;
mod handlers;
mod host;
mod memory;
mod message;
mod node;
mod peers;
mod peerstore;
mod profile;
mod stream;
mod transport;

#[cfg(test)]
mod test_utils;

pub use datasets::{DatasetLogParams, ListParams};
pub use handlers::HandlerFunc;
pub use host::Libp2pHost;
pub use memory::{MemoryHost, MemoryNetwork};
pub use message::{Message, MsgType};
pub use node::{MessageSubscription, NodeState, QriNode, QRI_PROTOCOL_ID};
pub use peers::{PeerConnectionParams, BASELINE_REPUTATION, REPUTATION_TAG};
pub use peerstore::PeerStore;
pub use stream::WrappedStream;
pub use transport::{BoxedStream, Connection, PeerInfo, StreamHandler, Transport};

use crate::registry::RegistryError;
use crate::repo::RepoError;
use crate::store::StoreError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("p2p connection is disabled")]
    Disabled,

    #[error("node is offline")]
    Offline,

    #[error("node is closed")]
    Closed,

    #[error("check reputation: no registry provided")]
    NoRegistry,

    #[error("Failed to initialize network: {0}")]
    InitializationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("no network info for {0}")]
    NoNetworkInfo(String),

    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Timeout")]
    Timeout,
}
