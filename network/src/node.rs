use privbill_core::crypto::PublicKey;
use privbill_core::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Network role of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Data owner: holds plaintext data, receives encrypted bills.
    Core,
    /// Aggregator: collects hidden data and runs the billing kernel.
    Edge,
}

/// A known network member.
///
/// Identity is self-certifying: `id` is derived from the signing key, so
/// a node cannot claim another's identity without its key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: SocketAddr,
    pub public_key: PublicKey,
    pub role: NodeRole,
}

impl NodeInfo {
    pub fn id(&self) -> ClientId {
        self.public_key.node_id()
    }
}

/// Address-keyed table of known nodes, the local node included.
#[derive(Clone, Debug)]
pub struct NodeTable {
    local: SocketAddr,
    members: HashMap<SocketAddr, NodeInfo>,
}

impl NodeTable {
    pub fn new(local: SocketAddr) -> Self {
        NodeTable {
            local,
            members: HashMap::new(),
        }
    }

    pub fn insert(&mut self, node: NodeInfo) {
        self.members.insert(node.address, node);
    }

    pub fn get(&self, address: SocketAddr) -> Option<&NodeInfo> {
        self.members.get(&address)
    }

    pub fn contains(&self, address: SocketAddr) -> bool {
        self.members.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.members.keys().copied()
    }

    /// All members except the local node.
    pub fn peers(&self) -> impl Iterator<Item = &NodeInfo> {
        self.members.values().filter(move |n| n.address != self.local)
    }

    pub fn edges(&self) -> impl Iterator<Item = &NodeInfo> {
        self.members.values().filter(|n| n.role == NodeRole::Edge)
    }

    pub fn cores(&self) -> impl Iterator<Item = &NodeInfo> {
        self.members.values().filter(|n| n.role == NodeRole::Core)
    }

    pub fn snapshot(&self) -> HashMap<SocketAddr, NodeInfo> {
        self.members.clone()
    }
}
