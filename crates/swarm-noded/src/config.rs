//! Process-level configuration: listening ports, bootstrap seeds, and the
//! narrow slice of manifest fields this node needs (§6). Metainfo/bencode
//! parsing stays out of scope; these fields are expected to already have
//! been decoded by whatever hands the operator a `.torrent` file — this
//! binary only reads them back out of the environment.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{bail, Context, Result};
use swarm_dht::Manifest;

/// Network-facing settings: which ports to bind and who to bootstrap from.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// DHT datagram listening port.
    pub dht_port: u16,
    /// Peer-wire TCP listening port. Per §6 this is typically (but not
    /// required to be) the same integer as `dht_port`.
    pub peer_port: u16,
    /// Seed contacts pinged at startup before the self-lookup (§6).
    pub bootstrap_nodes: Vec<SocketAddrV4>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            dht_port: 6881,
            peer_port: 6881,
            bootstrap_nodes: Vec::new(),
        }
    }
}

/// The manifest fields this node is allowed to depend on (§6): identity,
/// chunking, and total size. Constructing one of these from a real
/// `.torrent` file is the embedder's job, not this crate's.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    pub info_hash: [u8; 20],
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
}

impl TorrentConfig {
    pub fn into_manifest(self) -> Manifest {
        Manifest::new(self.info_hash, self.piece_length, self.piece_hashes, self.total_length)
    }
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub torrent: TorrentConfig,
}

impl NodeConfig {
    /// Read configuration from the environment:
    ///
    /// - `SWARM_DHT_PORT` (default 6881)
    /// - `SWARM_PEER_PORT` (default: same as `SWARM_DHT_PORT`)
    /// - `SWARM_BOOTSTRAP` (comma-separated `ip:port` list, default empty)
    /// - `SWARM_INFO_HASH` (required, 40 hex chars)
    /// - `SWARM_PIECE_LENGTH` (default 16384)
    /// - `SWARM_PIECE_HASHES` (required, comma-separated 40-hex-char digests)
    /// - `SWARM_TOTAL_LENGTH` (required, bytes)
    pub fn from_env() -> Result<Self> {
        let dht_port = env_or("SWARM_DHT_PORT", 6881)?;
        let peer_port = env_or("SWARM_PEER_PORT", dht_port)?;
        let bootstrap_nodes = parse_bootstrap_list(&std::env::var("SWARM_BOOTSTRAP").unwrap_or_default())?;

        let info_hash = parse_hex20(&require_env("SWARM_INFO_HASH")?).context("SWARM_INFO_HASH")?;
        let piece_length = env_or("SWARM_PIECE_LENGTH", 16384u32)?;
        let piece_hashes = require_env("SWARM_PIECE_HASHES")?
            .split(',')
            .map(|s| parse_hex20(s.trim()))
            .collect::<Result<Vec<_>>>()
            .context("SWARM_PIECE_HASHES")?;
        let total_length: u64 = require_env("SWARM_TOTAL_LENGTH")?.parse().context("SWARM_TOTAL_LENGTH")?;

        let config = Self {
            network: NetworkConfig {
                dht_port,
                peer_port,
                bootstrap_nodes,
            },
            torrent: TorrentConfig {
                info_hash,
                piece_length,
                piece_hashes,
                total_length,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject manifests that can't possibly describe real content: zero
    /// pieces, a zero piece length, or a total length shorter than the
    /// declared piece count implies.
    pub fn validate(&self) -> Result<()> {
        if self.torrent.piece_hashes.is_empty() {
            bail!("manifest declares zero pieces");
        }
        if self.torrent.piece_length == 0 {
            bail!("piece_length must be nonzero");
        }
        if self.torrent.total_length == 0 {
            bail!("total_length must be nonzero");
        }
        Ok(())
    }

    pub fn dht_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.network.dht_port)
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.network.peer_port)
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_hex20(s: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(s).with_context(|| format!("'{s}' is not valid hex"))?;
    if bytes.len() != 20 {
        bail!("expected 20 bytes (40 hex chars), got {}", bytes.len());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_bootstrap_list(raw: &str) -> Result<Vec<SocketAddrV4>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SocketAddrV4>().with_context(|| format!("invalid bootstrap address '{s}'")))
        .collect()
}
