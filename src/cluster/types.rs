use serde::{Deserialize, Serialize};
use std::fmt;

/// Base URL of a cluster member, e.g. `http://10.0.0.1:8080`.
///
/// Membership is a static list known at startup; the position of a node in
/// that list is its shard index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeAddress {
    fn from(url: &str) -> Self {
        Self(url.trim_end_matches('/').to_string())
    }
}

impl From<String> for NodeAddress {
    fn from(url: String) -> Self {
        Self::from(url.as_str())
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed cluster membership as seen from one node.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeAddress>,
    local: usize,
}

impl Topology {
    /// Builds the topology, failing if `local` is not one of `nodes` or the
    /// member list contains duplicates.
    pub fn new(nodes: Vec<NodeAddress>, local: &NodeAddress) -> anyhow::Result<Self> {
        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].contains(node) {
                anyhow::bail!("Duplicate cluster member {}", node);
            }
        }
        let local = nodes
            .iter()
            .position(|node| node == local)
            .ok_or_else(|| anyhow::anyhow!("Local node {} is not a cluster member", local))?;
        Ok(Self { nodes, local })
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> &NodeAddress {
        &self.nodes[index]
    }

    pub fn local_index(&self) -> usize {
        self.local
    }

    pub fn is_local(&self, index: usize) -> bool {
        index == self.local
    }

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }
}
