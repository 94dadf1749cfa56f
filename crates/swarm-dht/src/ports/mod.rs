//! Capability traits the domain and RPC layers are driven through.
//!
//! Per the redesign in the original design notes, components never hold a
//! back-reference to their owner; they receive a small capability handle
//! instead. [`Prober`] is that handle for k-bucket eviction challenges.

use std::net::SocketAddrV4;

use async_trait::async_trait;

/// Liveness probe used to decide whether to evict the oldest contact in a
/// full k-bucket. Implementations perform exactly one RPC (a `ping`) and
/// return; they must not recurse back into routing-table insertion.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn is_alive(&self, addr: SocketAddrV4) -> bool;
}

/// No-op prober for domain-only tests: always reports the oldest contact as
/// dead, forcing eviction.
pub struct AlwaysDead;

#[async_trait]
impl Prober for AlwaysDead {
    async fn is_alive(&self, _addr: SocketAddrV4) -> bool {
        false
    }
}

/// No-op prober that always reports the oldest contact alive, forcing the
/// new candidate to be dropped.
pub struct AlwaysAlive;

#[async_trait]
impl Prober for AlwaysAlive {
    async fn is_alive(&self, _addr: SocketAddrV4) -> bool {
        true
    }
}
