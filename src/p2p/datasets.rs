//! Dataset info, listing, history and event log exchange

use super::handlers::send_reply;
use super::{Message, MsgType, P2PError, QriNode, WrappedStream};
use crate::repo::{DatasetRef, Event, RepoError};

use futures::future::{BoxFuture, FutureExt};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Peers asked in turn when resolving a reference over the network
const RESOLVE_PEER_LIMIT: usize = 15;

/// Page request for dataset and event listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetLogParams {
    #[serde(rename = "ref")]
    pub reference: DatasetRef,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

pub(super) fn handle_dataset_info<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let found = match msg.decode_body::<DatasetRef>() {
            Ok(reference) => node.local_dataset_info(reference).await,
            Err(e) => {
                tracing::debug!("invalid dataset reference from {}: {}", msg.initiator, e);
                None
            }
        };
        send_reply(ws, &msg, &found).await
    }
    .boxed()
}

pub(super) fn handle_datasets_list<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let params: ListParams = msg.decode_body().unwrap_or_default();
        let refs = match node.published_references(params) {
            Ok(refs) => refs,
            Err(e) => {
                tracing::debug!("error listing datasets: {}", e);
                vec![]
            }
        };
        send_reply(ws, &msg, &refs).await
    }
    .boxed()
}

pub(super) fn handle_events<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let params: ListParams = msg.decode_body().unwrap_or_default();
        let events = match node.repo().events(params.limit, params.offset) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!("error reading event log: {}", e);
                vec![]
            }
        };
        send_reply(ws, &msg, &events).await
    }
    .boxed()
}

pub(super) fn handle_resolve_dataset_ref<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let resolved = msg.decode_body::<DatasetRef>().ok().and_then(|mut reference| {
            node.repo()
                .resolve_ref(&mut reference)
                .ok()
                .map(|_| reference)
        });
        send_reply(ws, &msg, &resolved).await
    }
    .boxed()
}

pub(super) fn handle_dataset_log<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }

        let log = msg.decode_body::<DatasetLogParams>().ok().and_then(|params| {
            let limit = if params.limit == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                params.limit
            };
            node.repo()
                .dataset_log(&params.reference, limit, params.offset)
                .map_err(|e| tracing::debug!("error reading dataset log: {}", e))
                .ok()
        });
        send_reply(ws, &msg, &log).await
    }
    .boxed()
}

impl QriNode {
    /// Resolve a reference locally, loading its descriptor from the store
    /// when the repository does not hold it inline
    async fn local_dataset_info(&self, mut reference: DatasetRef) -> Option<DatasetRef> {
        if let Err(e) = self.repo().resolve_ref(&mut reference) {
            tracing::debug!("error resolving {}: {}", reference, e);
            return None;
        }

        if reference.dataset.is_none() && !reference.path.is_empty() {
            match self.repo().store().get(&reference.path).await {
                Ok(data) => match serde_json::from_slice(&data) {
                    Ok(dataset) => reference.dataset = Some(dataset),
                    Err(e) => tracing::debug!("invalid descriptor at {}: {}", reference.path, e),
                },
                Err(e) => tracing::debug!("error loading {}: {}", reference.path, e),
            }
        }
        Some(reference)
    }

    fn published_references(&self, params: ListParams) -> Result<Vec<DatasetRef>, RepoError> {
        Ok(self
            .repo()
            .references(usize::MAX, 0)?
            .into_iter()
            .filter(|r| r.published)
            .skip(params.offset)
            .take(params.limit)
            .collect())
    }

    /// Ask `pid` for the full record of a dataset
    pub async fn request_dataset_info(
        self: &Arc<Self>,
        pid: PeerId,
        reference: &DatasetRef,
    ) -> Result<Option<DatasetRef>, P2PError> {
        let msg = Message::encode(self.id(), MsgType::DatasetInfo, reference)?;
        self.request(pid, msg).await?.decode_body()
    }

    /// Page of the datasets `pid` has published
    pub async fn request_datasets_list(
        self: &Arc<Self>,
        pid: PeerId,
        params: ListParams,
    ) -> Result<Vec<DatasetRef>, P2PError> {
        let msg = Message::encode(self.id(), MsgType::DatasetsList, &params)?;
        self.request(pid, msg).await?.decode_body()
    }

    /// Page of `pid`'s event log
    pub async fn request_events(
        self: &Arc<Self>,
        pid: PeerId,
        params: ListParams,
    ) -> Result<Vec<Event>, P2PError> {
        let msg = Message::encode(self.id(), MsgType::Events, &params)?;
        self.request(pid, msg).await?.decode_body()
    }

    /// Version history of a dataset as `pid` knows it
    pub async fn request_dataset_log(
        self: &Arc<Self>,
        pid: PeerId,
        params: &DatasetLogParams,
    ) -> Result<Vec<DatasetRef>, P2PError> {
        let msg = Message::encode(self.id(), MsgType::DatasetLog, params)?;
        let log: Option<Vec<DatasetRef>> = self.request(pid, msg).await?.decode_body()?;
        log.ok_or_else(|| RepoError::NotFound(params.reference.to_string()).into())
    }

    /// Resolve a reference by asking the peers closest to its owner
    pub async fn resolve_dataset_ref(
        self: &Arc<Self>,
        reference: &DatasetRef,
    ) -> Result<DatasetRef, P2PError> {
        let profile_id = match &reference.profile_id {
            Some(id) => Some(id.clone()),
            None => self.repo().profiles().peername_id(&reference.peername).ok(),
        };

        let pids = match &profile_id {
            Some(id) => self.closest_connected_peers(id, RESOLVE_PEER_LIMIT),
            None => self
                .peers()
                .into_iter()
                .take(RESOLVE_PEER_LIMIT)
                .collect(),
        };

        for pid in pids {
            let msg = Message::encode(self.id(), MsgType::ResolveDatasetRef, reference)?;
            match self.request(pid, msg).await {
                Ok(reply) => match reply.decode_body::<Option<DatasetRef>>() {
                    Ok(Some(resolved)) => return Ok(resolved),
                    Ok(None) => {}
                    Err(e) => tracing::debug!("invalid resolve reply from {}: {}", pid, e),
                },
                Err(e) => tracing::debug!("error resolving {} with {}: {}", reference, pid, e),
            }
        }

        Err(RepoError::NotFound(reference.to_string()).into())
    }
}
