//! Process wiring for a `swarm-dht` content distribution node: environment
//! configuration, structured logging setup, and the startup/shutdown
//! lifecycle. The actual DHT and peer-wire logic lives in `swarm-dht`; this
//! crate only assembles it into a runnable process.

pub mod config;

pub use config::{NetworkConfig, NodeConfig, TorrentConfig};
