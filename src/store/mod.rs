//! Store Module - content-addressed object storage
//!
//! The node consumes the object store through the [`Store`] capability.
//! Stores that embed their own network host can opt into [`Onlineable`],
//! in which case the node overlays its protocol on that host instead of
//! building one.

mod hashing;
mod mem;

pub use hashing::ContentHash;
pub use mem::MemStore;

use crate::p2p::Transport;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Integrity check failed for {0}")]
    IntegrityCheckFailed(String),

    #[error("Store is offline")]
    Offline,

    #[error("Store error: {0}")]
    Other(String),
}

/// Content-addressed object store
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the object at `path`
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write an object, returning its path
    async fn put(&self, data: Vec<u8>, pin: bool) -> Result<String, StoreError>;

    async fn pin(&self, path: &str) -> Result<(), StoreError>;

    async fn unpin(&self, path: &str) -> Result<(), StoreError>;

    /// Retrieve an object, going to the network if it is not held locally
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    async fn has(&self, path: &str) -> Result<bool, StoreError>;

    /// Capability check for stores that carry their own network host
    fn as_onlineable(&self) -> Option<&dyn Onlineable> {
        None
    }
}

/// A store backed by a network-capable node
#[async_trait]
pub trait Onlineable: Send + Sync {
    fn is_online(&self) -> bool;

    async fn go_online(&self) -> Result<(), StoreError>;

    /// Host the node should overlay its protocol on, once online
    fn transport(&self) -> Option<Arc<dyn Transport>>;
}
