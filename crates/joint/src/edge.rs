// SPDX-License-Identifier: MIT OR Apache-2.0
//! Edge definitions for the graph.

use crate::node::NodeId;
use crate::port::PortId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Create a new random edge ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A node + port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Node owning the port
    pub node: NodeId,
    /// Port on that node
    pub port: PortId,
}

impl PortRef {
    /// Create a port reference
    pub fn new(node: NodeId, port: PortId) -> Self {
        Self { node, port }
    }
}

/// A directed edge between two ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique edge ID
    pub id: EdgeId,
    /// Source (output) port
    pub from: PortRef,
    /// Target (input) port
    pub to: PortRef,
    /// Routing priority, higher wins
    #[serde(default)]
    pub priority: i32,
}

impl Edge {
    /// Create a new edge
    pub fn new(from: PortRef, to: PortRef, priority: i32) -> Self {
        Self {
            id: EdgeId::new(),
            from,
            to,
            priority,
        }
    }

    /// Check if this edge involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from.node == node_id || self.to.node == node_id
    }

    /// Check if this edge involves a specific port
    pub fn involves_port(&self, port_id: PortId) -> bool {
        self.from.port == port_id || self.to.port == port_id
    }

    /// Whether the edge joins exactly this pair of ports
    pub fn joins(&self, from: PortRef, to: PortRef) -> bool {
        self.from == from && self.to == to
    }
}
