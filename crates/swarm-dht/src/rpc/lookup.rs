//! Iterative node lookup (`find_node`) and value lookup (`get_peers`).
//!
//! Both share the same α-parallel shortlist walk described in §4.5: probe
//! the `alpha` closest not-yet-queried contacts in the current shortlist,
//! fold their replies back in, and stop once a full round produces no
//! contact closer than the best seen so far.

use std::collections::HashSet;
use std::net::SocketAddrV4;

use futures::future::join_all;
use parking_lot::Mutex;

use crate::domain::{KademliaConfig, NodeId, RoutingTable};

use super::message::NodeDescriptor;
use super::server::RpcClient;
use super::transport::RpcTransport;

#[derive(Debug, Clone)]
struct ShortlistEntry {
    descriptor: NodeDescriptor,
    queried: bool,
}

fn seed_shortlist(table: &Mutex<RoutingTable>, target: &NodeId, k: usize) -> Vec<ShortlistEntry> {
    table
        .lock()
        .closest(target, k)
        .into_iter()
        .map(|c| ShortlistEntry {
            descriptor: NodeDescriptor { node_id: c.node_id, addr: c.addr },
            queried: false,
        })
        .collect()
}

fn merge_and_sort(shortlist: &mut Vec<ShortlistEntry>, seen: &mut HashSet<NodeId>, target: &NodeId, fresh: Vec<NodeDescriptor>) {
    for desc in fresh {
        if seen.insert(desc.node_id) {
            shortlist.push(ShortlistEntry { descriptor: desc, queried: false });
        }
    }
    shortlist.sort_by_key(|e| e.descriptor.node_id.distance(target));
}

/// Walk the network towards `target`, returning the `k` closest live
/// contacts found. Terminates when a full wave of `alpha` queries yields no
/// contact closer than the best already known (convergence), or when the
/// shortlist is exhausted.
pub async fn iterative_find_node<T: RpcTransport>(
    client: &RpcClient<T>,
    table: &Mutex<RoutingTable>,
    local_id: NodeId,
    target: NodeId,
    config: &KademliaConfig,
) -> Vec<NodeDescriptor> {
    let mut shortlist = seed_shortlist(table, &target, config.k);
    let mut seen: HashSet<NodeId> = shortlist.iter().map(|e| e.descriptor.node_id).collect();
    seen.insert(local_id);

    loop {
        let to_query: Vec<ShortlistEntry> = shortlist
            .iter()
            .filter(|e| !e.queried)
            .take(config.alpha)
            .cloned()
            .collect();
        if to_query.is_empty() {
            break;
        }

        let best_before = shortlist.first().map(|e| e.descriptor.node_id.distance(&target));

        for entry in &to_query {
            if let Some(slot) = shortlist.iter_mut().find(|e| e.descriptor.node_id == entry.descriptor.node_id) {
                slot.queried = true;
            }
        }

        // §4.5: the wave's probes run concurrently, bounded to `alpha` per
        // wave by `to_query`'s length; the wave only advances once every
        // probe has returned or timed out (`join_all` is itself the
        // barrier — no new wave starts while one is in flight).
        let replies = join_all(
            to_query
                .iter()
                .map(|entry| client.find_node(entry.descriptor.node_id, entry.descriptor.addr, target)),
        )
        .await;
        let fresh: Vec<NodeDescriptor> = replies.into_iter().filter_map(Result::ok).flatten().collect();

        merge_and_sort(&mut shortlist, &mut seen, &target, fresh);

        let best_after = shortlist.first().map(|e| e.descriptor.node_id.distance(&target));
        if best_after.is_some() && best_after >= best_before && shortlist.iter().all(|e| e.queried) {
            break;
        }
    }

    shortlist.into_iter().take(config.k).map(|e| e.descriptor).collect()
}

/// Outcome of [`iterative_get_peers`]: either peers were found directly, or
/// only closer nodes were learned (caller may then announce to them).
pub enum GetPeersOutcome {
    Peers(Vec<SocketAddrV4>),
    NodesOnly(Vec<NodeDescriptor>),
}

/// Same shortlist walk as [`iterative_find_node`], but accumulates `values`
/// from every `get_peers` reply along the way instead of stopping at the
/// first one — multiple disjoint nodes may each hold a partial announce
/// set, so all of them are collected and deduplicated.
pub async fn iterative_get_peers<T: RpcTransport>(
    client: &RpcClient<T>,
    table: &Mutex<RoutingTable>,
    local_id: NodeId,
    info_hash: NodeId,
    config: &KademliaConfig,
) -> GetPeersOutcome {
    let mut shortlist = seed_shortlist(table, &info_hash, config.k);
    let mut seen: HashSet<NodeId> = shortlist.iter().map(|e| e.descriptor.node_id).collect();
    seen.insert(local_id);

    let mut values: HashSet<SocketAddrV4> = HashSet::new();

    loop {
        let to_query: Vec<ShortlistEntry> = shortlist
            .iter()
            .filter(|e| !e.queried)
            .take(config.alpha)
            .cloned()
            .collect();
        if to_query.is_empty() {
            break;
        }

        let best_before = shortlist.first().map(|e| e.descriptor.node_id.distance(&info_hash));

        for entry in &to_query {
            if let Some(slot) = shortlist.iter_mut().find(|e| e.descriptor.node_id == entry.descriptor.node_id) {
                slot.queried = true;
            }
        }

        let replies = join_all(
            to_query
                .iter()
                .map(|entry| client.get_peers(entry.descriptor.node_id, entry.descriptor.addr, info_hash)),
        )
        .await;
        let mut fresh_nodes = Vec::new();
        for (nodes, peers) in replies.into_iter().filter_map(Result::ok) {
            values.extend(peers);
            fresh_nodes.extend(nodes);
        }

        merge_and_sort(&mut shortlist, &mut seen, &info_hash, fresh_nodes);

        let best_after = shortlist.first().map(|e| e.descriptor.node_id.distance(&info_hash));
        if best_after.is_some() && best_after >= best_before && shortlist.iter().all(|e| e.queried) {
            break;
        }
    }

    if !values.is_empty() {
        GetPeersOutcome::Peers(values.into_iter().collect())
    } else {
        GetPeersOutcome::NodesOnly(shortlist.into_iter().take(config.k).map(|e| e.descriptor).collect())
    }
}

/// Convenience used by the scheduler: look the swarm up and announce this
/// node as a holder of `info_hash` to the nodes closest to it.
pub async fn announce_to_closest<T: RpcTransport>(
    client: &RpcClient<T>,
    nodes: &[NodeDescriptor],
    info_hash: NodeId,
    peer_port: u16,
) {
    for node in nodes {
        let _ = client.announce_peer(node.addr, info_hash, peer_port).await;
    }
}
