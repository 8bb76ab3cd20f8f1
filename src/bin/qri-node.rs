use anyhow::Context;
use clap::Parser;
use qri_core::identity::NodeIdentity;
use qri_core::repo::{MemRepo, Profile, ProfileId};
use qri_core::{Config, QriNode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Qri peer-to-peer dataset node")]
struct Args {
    /// Path to a JSON config file; defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peername of the local profile
    #[arg(short, long, default_value = "me")]
    peername: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            tracing::warn!("No config file given, using the default config");
            Config::default()
        }
    };

    if config.p2p.private_key.is_none() {
        config.p2p.private_key = Some(NodeIdentity::generate().to_base64()?);
    }
    let identity = config.p2p.decode_identity()?;
    let profile = Profile::new(ProfileId::new(identity.peer_id().to_string()), &args.peername);
    let repo = Arc::new(MemRepo::new(profile));

    let node = QriNode::new(repo, &config)?;
    node.connect().await.context("bringing node online")?;
    node.start_online_services()?;

    for addr in node.encapsulated_addresses()? {
        tracing::info!("Reachable at {}", addr);
    }

    let mut messages = node.receive_messages();
    loop {
        tokio::select! {
            msg = messages.recv() => match msg {
                Some(msg) => tracing::info!(
                    "{} message {} from {}",
                    msg.msg_type,
                    msg.id,
                    msg.initiator
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    node.close().await;
    Ok(())
}
