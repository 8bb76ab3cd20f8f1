//! Repository Module - local profiles, references and event log
//!
//! The node reads and updates repository state through the [`Repo`] and
//! [`ProfileStore`] capabilities. [`MemRepo`] is an in-memory implementation.

mod dataset_ref;
mod mem;
mod profile;

pub use dataset_ref::{DatasetRef, Event, EventType};
pub use mem::MemRepo;
pub use profile::{Profile, ProfileId};

use crate::store::Store;

use libp2p::PeerId;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("Repository error: {0}")]
    Other(String),
}

/// Known profiles and their peer ids
pub trait ProfileStore: Send + Sync {
    /// Insert or replace a profile
    fn put_profile(&self, profile: Profile) -> Result<(), RepoError>;

    fn get_profile(&self, id: &ProfileId) -> Result<Profile, RepoError>;

    /// Profile operating `peer_id`
    fn peer_profile(&self, peer_id: &PeerId) -> Result<Profile, RepoError>;

    /// Profile id for a peername
    fn peername_id(&self, peername: &str) -> Result<ProfileId, RepoError>;

    /// Peer ids known for a profile, in insertion order
    fn peer_ids(&self, id: &ProfileId) -> Result<Vec<PeerId>, RepoError>;
}

/// A node's local repository
pub trait Repo: Send + Sync {
    /// Profile of the local user
    fn profile(&self) -> Result<Profile, RepoError>;

    /// Replace the local profile (also recorded in the profile store)
    fn set_profile(&self, profile: Profile) -> Result<(), RepoError>;

    fn profiles(&self) -> &dyn ProfileStore;

    fn store(&self) -> Arc<dyn Store>;

    /// Page of local dataset references, most recent first
    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, RepoError>;

    /// Record a dataset version; it becomes the head of its alias
    fn put_ref(&self, reference: DatasetRef) -> Result<(), RepoError>;

    /// Fill in missing fields of a reference from local state
    fn resolve_ref(&self, reference: &mut DatasetRef) -> Result<(), RepoError>;

    /// Version history of a dataset, newest first
    fn dataset_log(
        &self,
        reference: &DatasetRef,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DatasetRef>, RepoError>;

    /// Page of the event log, most recent first
    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, RepoError>;

    fn log_event(&self, event_type: EventType, reference: DatasetRef) -> Result<(), RepoError>;
}
