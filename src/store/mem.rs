//! In-memory object store

use super::{ContentHash, Onlineable, Store, StoreError};
use crate::p2p::Transport;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    pinned: bool,
}

/// Store that keeps every object in memory
#[derive(Default)]
pub struct MemStore {
    objects: DashMap<ContentHash, StoredObject>,
    host: Option<Arc<dyn Transport>>,
    online: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that opts into [`Onlineable`], handing `host` to the node
    pub fn with_transport(host: Arc<dyn Transport>) -> Self {
        Self {
            objects: DashMap::new(),
            host: Some(host),
            online: AtomicBool::new(false),
        }
    }

    pub fn pinned_count(&self) -> usize {
        self.objects.iter().filter(|o| o.pinned).count()
    }

    fn key(path: &str) -> Result<ContentHash, StoreError> {
        ContentHash::from_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let key = Self::key(path)?;
        let object = self
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        if !key.verify(&object.data) {
            return Err(StoreError::IntegrityCheckFailed(path.to_string()));
        }
        Ok(object.data.clone())
    }

    async fn put(&self, data: Vec<u8>, pin: bool) -> Result<String, StoreError> {
        let key = ContentHash::hash(&data);
        self.objects
            .entry(key)
            .and_modify(|o| o.pinned |= pin)
            .or_insert(StoredObject { data, pinned: pin });
        Ok(key.to_path())
    }

    async fn pin(&self, path: &str) -> Result<(), StoreError> {
        let key = Self::key(path)?;
        let mut object = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        object.pinned = true;
        Ok(())
    }

    async fn unpin(&self, path: &str) -> Result<(), StoreError> {
        let key = Self::key(path)?;
        let mut object = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        object.pinned = false;
        Ok(())
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        // nothing to fetch from: the local copy is the only copy
        self.get(path).await
    }

    async fn has(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.objects.contains_key(&Self::key(path)?))
    }

    fn as_onlineable(&self) -> Option<&dyn Onlineable> {
        self.host.as_ref().map(|_| self as &dyn Onlineable)
    }
}

#[async_trait]
impl Onlineable for MemStore {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn go_online(&self) -> Result<(), StoreError> {
        if self.host.is_none() {
            return Err(StoreError::Offline);
        }
        self.online.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        if !self.is_online() {
            return None;
        }
        self.host.clone()
    }
}
