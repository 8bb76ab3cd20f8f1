//! Online services: bootstrapping, local discovery and peer-list follow-up

use super::{P2PError, PeerConnectionParams, PeerInfo, QriNode};

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

impl QriNode {
    /// Start the background services of an online node
    ///
    /// Dials the configured bootstrap peers, announcing this node once the
    /// first of them answers, and connects to every peer the transport
    /// discovers locally. Does nothing while the node is offline.
    pub fn start_online_services(self: &Arc<Self>) -> Result<(), P2PError> {
        if !self.is_online() {
            return Ok(());
        }
        let host = self.host()?;

        // listen addresses may have been bound since connect
        self.publish_addresses()?;

        let bootstrap = self.config().bootstrap_addrs.clone();
        if !bootstrap.is_empty() {
            let node = self.clone();
            tokio::spawn(async move {
                let mut announced = false;
                for addr in bootstrap {
                    let params = PeerConnectionParams::from_multiaddr(addr.clone());
                    match node.connect_to_peer(&params).await {
                        Ok(profile) => {
                            tracing::info!("Connected to bootstrap peer {} ({})", profile.peername, addr);
                            if !announced {
                                announced = true;
                                if let Err(e) = node.announce_connected().await {
                                    tracing::debug!("error announcing connection: {}", e);
                                }
                            }
                        }
                        Err(e) => tracing::warn!("error connecting to bootstrap peer {}: {}", addr, e),
                    }
                }
            });
        }

        if let Some(mut discovered) = host.take_discovered_peers() {
            let node = Arc::downgrade(self);
            let shutdown = self.shutdown_token();
            tokio::spawn(async move {
                loop {
                    let info = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        info = discovered.recv() => match info {
                            Some(info) => info,
                            None => break,
                        },
                    };
                    let Some(node) = node.upgrade() else {
                        break;
                    };
                    if node.peer_difference(vec![info.clone()]).is_empty() {
                        continue;
                    }

                    tracing::debug!("Discovered peer {}", info.id);
                    let params = PeerConnectionParams::from_peer_id(info.id);
                    if let Err(e) = node.connect_to_peer(&params).await {
                        tracing::debug!("error connecting to discovered peer {}: {}", info.id, e);
                    }
                }
            });
        }

        Ok(())
    }

    /// Dial peers learned from a peer-list exchange that are not yet
    /// connected, up to the configured cap
    pub fn request_new_peers(self: &Arc<Self>, peers: Vec<PeerInfo>) -> BoxFuture<'static, ()> {
        let node = self.clone();
        async move {
            let Ok(host) = node.host() else {
                return;
            };

            let limit = node.config().max_peer_requests;
            for info in node.peer_difference(peers).into_iter().take(limit) {
                host.peerstore().add_addrs(info.id, info.addrs.clone());

                let params = PeerConnectionParams::from_peer_id(info.id);
                match node.connect_to_peer(&params).await {
                    Ok(profile) => tracing::debug!("Connected to {} ({})", profile.peername, info.id),
                    Err(e) => tracing::debug!("error connecting to {}: {}", info.id, e),
                }
            }
        }
        .boxed()
    }
}
