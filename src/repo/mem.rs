//! In-memory repository

use super::{DatasetRef, Event, EventType, Profile, ProfileId, ProfileStore, Repo, RepoError};
use crate::store::{MemStore, Store};

use chrono::Utc;
use libp2p::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile store held in a map
#[derive(Default)]
pub struct MemProfileStore {
    profiles: RwLock<HashMap<ProfileId, Profile>>,
}

impl ProfileStore for MemProfileStore {
    fn put_profile(&self, profile: Profile) -> Result<(), RepoError> {
        if profile.id.is_empty() {
            return Err(RepoError::Other("profile id is required".into()));
        }
        self.profiles.write().insert(profile.id.clone(), profile);
        Ok(())
    }

    fn get_profile(&self, id: &ProfileId) -> Result<Profile, RepoError> {
        self.profiles
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("profile {}", id)))
    }

    fn peer_profile(&self, peer_id: &PeerId) -> Result<Profile, RepoError> {
        self.profiles
            .read()
            .values()
            .find(|p| p.peer_ids.contains(peer_id))
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("profile for peer {}", peer_id)))
    }

    fn peername_id(&self, peername: &str) -> Result<ProfileId, RepoError> {
        self.profiles
            .read()
            .values()
            .find(|p| p.peername == peername)
            .map(|p| p.id.clone())
            .ok_or_else(|| RepoError::NotFound(format!("peername {}", peername)))
    }

    fn peer_ids(&self, id: &ProfileId) -> Result<Vec<PeerId>, RepoError> {
        Ok(self.get_profile(id)?.peer_ids)
    }
}

/// Repository that keeps everything in memory
pub struct MemRepo {
    profile: RwLock<Profile>,
    profiles: MemProfileStore,
    store: Arc<dyn Store>,
    /// Head of each dataset alias, most recently written first
    heads: RwLock<Vec<DatasetRef>>,
    /// Every recorded version, by path
    versions: RwLock<HashMap<String, DatasetRef>>,
    events: RwLock<Vec<Event>>,
}

impl MemRepo {
    pub fn new(profile: Profile) -> Self {
        Self::with_store(profile, Arc::new(MemStore::new()))
    }

    pub fn with_store(profile: Profile, store: Arc<dyn Store>) -> Self {
        let profiles = MemProfileStore::default();
        // the local profile always has an id, so this cannot fail
        let _ = profiles.put_profile(profile.clone());
        Self {
            profile: RwLock::new(profile),
            profiles,
            store,
            heads: RwLock::new(vec![]),
            versions: RwLock::new(HashMap::new()),
            events: RwLock::new(vec![]),
        }
    }

    fn find_head(&self, peername: &str, name: &str) -> Option<DatasetRef> {
        let peername = if peername == "me" {
            self.profile.read().peername.clone()
        } else {
            peername.to_string()
        };
        self.heads
            .read()
            .iter()
            .find(|r| r.peername == peername && r.name == name)
            .cloned()
    }
}

impl Repo for MemRepo {
    fn profile(&self) -> Result<Profile, RepoError> {
        Ok(self.profile.read().clone())
    }

    fn set_profile(&self, mut profile: Profile) -> Result<(), RepoError> {
        profile.updated = Utc::now();
        self.profiles.put_profile(profile.clone())?;
        *self.profile.write() = profile;
        Ok(())
    }

    fn profiles(&self) -> &dyn ProfileStore {
        &self.profiles
    }

    fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, RepoError> {
        Ok(self
            .heads
            .read()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn put_ref(&self, mut reference: DatasetRef) -> Result<(), RepoError> {
        if reference.peername.is_empty() || reference.name.is_empty() || reference.path.is_empty() {
            return Err(RepoError::InvalidRef(reference.to_string()));
        }
        if reference.profile_id.is_none() {
            reference.profile_id = self.profiles.peername_id(&reference.peername).ok();
        }

        let previous = self.find_head(&reference.peername, &reference.name);
        if let Some(prev) = &previous {
            if reference.previous.is_empty() && prev.path != reference.path {
                reference.previous = prev.path.clone();
            }
        }

        {
            let mut heads = self.heads.write();
            heads.retain(|r| !(r.peername == reference.peername && r.name == reference.name));
            heads.insert(0, reference.clone());
        }
        self.versions
            .write()
            .insert(reference.path.clone(), reference.clone());

        let event_type = if previous.is_some() {
            EventType::DatasetUpdated
        } else {
            EventType::DatasetCreated
        };
        self.log_event(event_type, reference)
    }

    fn resolve_ref(&self, reference: &mut DatasetRef) -> Result<(), RepoError> {
        if reference.is_empty() {
            return Err(RepoError::InvalidRef("empty reference".into()));
        }

        let found = if !reference.path.is_empty() {
            self.versions.read().get(&reference.path).cloned()
        } else {
            self.find_head(&reference.peername, &reference.name)
        };
        let found = found.ok_or_else(|| RepoError::NotFound(reference.to_string()))?;

        if reference.peername.is_empty() || reference.peername == "me" {
            reference.peername = found.peername;
        }
        if reference.name.is_empty() {
            reference.name = found.name;
        }
        if reference.path.is_empty() {
            reference.path = found.path;
        }
        if reference.profile_id.is_none() {
            reference.profile_id = found.profile_id;
        }
        if reference.previous.is_empty() {
            reference.previous = found.previous;
        }
        if reference.dataset.is_none() {
            reference.dataset = found.dataset;
        }
        reference.published = found.published;
        Ok(())
    }

    fn dataset_log(
        &self,
        reference: &DatasetRef,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DatasetRef>, RepoError> {
        let mut head = reference.clone();
        self.resolve_ref(&mut head)?;

        let versions = self.versions.read();
        let mut log = vec![];
        let mut next = Some(head.path);
        while let Some(path) = next.take() {
            let Some(version) = versions.get(&path) else {
                break;
            };
            if !version.previous.is_empty() && log.len() < versions.len() {
                next = Some(version.previous.clone());
            }
            log.push(version.clone());
        }

        Ok(log.into_iter().skip(offset).take(limit).collect())
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, RepoError> {
        Ok(self
            .events
            .read()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn log_event(&self, event_type: EventType, reference: DatasetRef) -> Result<(), RepoError> {
        self.events.write().push(Event {
            time: Utc::now(),
            event_type,
            reference,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_repo() -> MemRepo {
        MemRepo::new(Profile::new(ProfileId::new("QmLocal"), "local"))
    }

    #[test]
    fn test_profile_lookups() {
        let repo = test_repo();
        let peer = PeerId::random();
        let remote = Profile::new(ProfileId::new("QmRemote"), "remote").with_peer_ids(vec![peer]);
        repo.profiles().put_profile(remote).unwrap();

        assert_eq!(
            repo.profiles().peername_id("remote").unwrap(),
            ProfileId::new("QmRemote")
        );
        assert_eq!(repo.profiles().peer_profile(&peer).unwrap().peername, "remote");
        assert_eq!(
            repo.profiles().peer_ids(&ProfileId::new("QmRemote")).unwrap(),
            vec![peer]
        );
        assert!(matches!(
            repo.profiles().peername_id("nobody"),
            Err(RepoError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_profile_updates_store() {
        let repo = test_repo();
        let peer = PeerId::random();
        let mut profile = repo.profile().unwrap();
        profile.peer_ids = vec![peer];
        repo.set_profile(profile).unwrap();

        assert_eq!(repo.profiles().peer_profile(&peer).unwrap().peername, "local");
    }

    #[test]
    fn test_resolve_and_log() {
        let repo = test_repo();
        repo.put_ref(DatasetRef::new("local", "cities").with_path("/blake3/v1"))
            .unwrap();
        repo.put_ref(DatasetRef::new("local", "cities").with_path("/blake3/v2"))
            .unwrap();
        repo.put_ref(DatasetRef::new("local", "cities").with_path("/blake3/v3"))
            .unwrap();

        let mut r = DatasetRef::new("me", "cities");
        repo.resolve_ref(&mut r).unwrap();
        assert_eq!(r.path, "/blake3/v3");
        assert_eq!(r.peername, "local");
        assert_eq!(r.profile_id, Some(ProfileId::new("QmLocal")));

        let log = repo.dataset_log(&DatasetRef::new("local", "cities"), 10, 0).unwrap();
        let paths: Vec<_> = log.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/blake3/v3", "/blake3/v2", "/blake3/v1"]);

        let page = repo.dataset_log(&DatasetRef::new("local", "cities"), 1, 1).unwrap();
        assert_eq!(page[0].path, "/blake3/v2");
    }

    #[test]
    fn test_events_most_recent_first() {
        let repo = test_repo();
        repo.put_ref(DatasetRef::new("local", "cities").with_path("/blake3/v1"))
            .unwrap();
        repo.put_ref(DatasetRef::new("local", "cities").with_path("/blake3/v2"))
            .unwrap();

        let events = repo.events(10, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::DatasetUpdated);
        assert_eq!(events[1].event_type, EventType::DatasetCreated);
    }

    #[test]
    fn test_unknown_ref() {
        let repo = test_repo();
        let mut r = DatasetRef::new("local", "missing");
        assert!(matches!(repo.resolve_ref(&mut r), Err(RepoError::NotFound(_))));
    }
}
