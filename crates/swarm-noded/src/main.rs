//! # swarm-noded
//!
//! The process entry point for a `swarm-dht` content distribution node:
//! reads configuration from the environment, binds the DHT and peer-wire
//! listeners, bootstraps into the overlay, announces this node as a holder
//! of the configured content, and runs until interrupted.
//!
//! Fatal startup errors (socket bind failure, a malformed manifest) are
//! logged and terminate the process with a nonzero exit code, per §7.

use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swarm_dht::{KademliaConfig, Node};
use swarm_noded::NodeConfig;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("swarm-noded starting up");

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration, cannot start");
            std::process::exit(1);
        }
    };

    let info_hash = config.torrent.info_hash;
    let peer_port = config.network.peer_port;
    let bootstrap_nodes = config.network.bootstrap_nodes.clone();
    let dht_addr = config.dht_addr();
    let peer_addr = config.peer_addr();
    let manifest = config.torrent.into_manifest();

    let node = match Node::init(dht_addr, peer_addr, manifest, KademliaConfig::default()).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "fatal startup failure");
            std::process::exit(1);
        }
    };

    info!(
        node_id = ?node.local_id(),
        dht = %dht_addr,
        peers = %node.tcp_listen_addr(),
        "node listening"
    );

    if !bootstrap_nodes.is_empty() {
        info!(count = bootstrap_nodes.len(), "bootstrapping into the overlay");
        node.bootstrap(&bootstrap_nodes).await;
        info!(contacts = node.routing_table_len(), "bootstrap complete");

        node.announce(swarm_dht::NodeId::new(info_hash), peer_port).await;
        info!("announced this node as a content holder");
    } else {
        info!("no bootstrap nodes configured; running standalone");
    }

    info!("node is running, press ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.shutdown();

    Ok(())
}
