//! Dispatch table

use super::{datasets, profile, Message, MsgType, P2PError, QriNode, WrappedStream};

use futures::future::{BoxFuture, FutureExt};
use libp2p::PeerId;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handles one inbound message; resolves to `true` to hang up
pub type HandlerFunc =
    for<'a> fn(&'a Arc<QriNode>, &'a mut WrappedStream, Message) -> BoxFuture<'a, bool>;

pub(crate) fn make_handlers() -> HashMap<MsgType, HandlerFunc> {
    let mut handlers: HashMap<MsgType, HandlerFunc> = HashMap::new();
    handlers.insert(MsgType::Ping, handle_ping);
    handlers.insert(MsgType::Profile, profile::handle_profile);
    handlers.insert(MsgType::QriPeers, profile::handle_qri_peers);
    handlers.insert(MsgType::Connected, profile::handle_connected);
    handlers.insert(MsgType::DatasetInfo, datasets::handle_dataset_info);
    handlers.insert(MsgType::DatasetsList, datasets::handle_datasets_list);
    handlers.insert(MsgType::Events, datasets::handle_events);
    handlers.insert(MsgType::ResolveDatasetRef, datasets::handle_resolve_dataset_ref);
    handlers.insert(MsgType::DatasetLog, datasets::handle_dataset_log);
    handlers
}

/// Answer `msg` with a terminal reply; always asks the loop to hang up
pub(crate) async fn send_reply<T: Serialize + Sync + ?Sized>(
    ws: &mut WrappedStream,
    msg: &Message,
    body: &T,
) -> bool {
    let reply = match msg.reply(body) {
        Ok(reply) => reply.with_hang_up(),
        Err(e) => {
            tracing::debug!("error encoding {} reply: {}", msg.msg_type, e);
            return true;
        }
    };
    if let Err(e) = ws.send_message(&reply).await {
        tracing::debug!("error sending {} reply: {}", msg.msg_type, e);
    }
    true
}

fn handle_ping<'a>(
    node: &'a Arc<QriNode>,
    ws: &'a mut WrappedStream,
    msg: Message,
) -> BoxFuture<'a, bool> {
    async move {
        if msg.is_reply_for(&node.id()) {
            return true;
        }
        send_reply(ws, &msg, "pong").await
    }
    .boxed()
}

impl QriNode {
    /// Round-trip time of a ping to `pid`
    pub async fn ping(self: &Arc<Self>, pid: PeerId) -> Result<Duration, P2PError> {
        let start = Instant::now();
        let msg = Message::new(self.id(), MsgType::Ping, json!("ping"));
        let reply = self.request(pid, msg).await?;

        let body: String = reply.decode_body()?;
        if body != "pong" {
            return Err(P2PError::Protocol(format!("unexpected ping reply: {}", body)));
        }
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::test_utils::make_test_node;
    use crate::p2p::MemoryNetwork;

    #[test]
    fn test_every_type_has_a_handler() {
        let handlers = make_handlers();
        assert_eq!(handlers.len(), 9);
        assert!(!handlers.contains_key(&MsgType::Unknown("gossip".into())));
    }

    #[tokio::test]
    async fn test_ping() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;
        let (b, _) = make_test_node(&network, "bob").await;

        a.ping(b.id()).await.unwrap();
        b.ping(a.id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_unknown_peer() {
        let network = MemoryNetwork::new();
        let (a, _) = make_test_node(&network, "alice").await;

        assert!(a.ping(PeerId::random()).await.is_err());
    }
}
