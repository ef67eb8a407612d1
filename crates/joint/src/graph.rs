// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph container: node arena, ownership tree and edge set.
//!
//! Nodes live in an insertion ordered arena keyed by [`NodeId`]. Ownership is
//! an id based parent/children relation rooted at [`JointGraph::roots`];
//! edges are a separate, possibly cyclic, set over the same ids. The two
//! relations never share storage, so ownership cycles cannot hide inside
//! legitimate execution loops.

use crate::edge::{Edge, EdgeId, PortRef};
use crate::node::{Node, NodeId};
use crate::port::{Port, PortDirection, PortId, PortType, PortValue};
use crate::tag::NodeTag;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Handle returned by [`JointGraph::on_structural_change`]
pub type ObserverId = u64;

/// Notification sent to structural change observers
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralChange {
    /// A node entered the graph
    NodeAdded {
        /// The new node
        node: NodeId,
        /// Owning parent, `None` for roots
        parent: Option<NodeId>,
    },
    /// A subtree left the graph (pre-order, subtree root first)
    NodesRemoved {
        /// Every removed node
        nodes: Vec<NodeId>,
    },
    /// A node changed owner or position among its siblings
    NodeMoved {
        /// The moved node
        node: NodeId,
        /// New parent, `None` when promoted to root
        parent: Option<NodeId>,
        /// Index among the new siblings
        index: usize,
    },
    /// A node's name changed
    NodeRenamed {
        /// The renamed node
        node: NodeId,
    },
    /// Ports, properties, tags or editor metadata changed
    NodeDataChanged {
        /// The changed node
        node: NodeId,
    },
    /// An edge was created
    Connected {
        /// The new edge
        edge: EdgeId,
    },
    /// An edge was removed
    Disconnected {
        /// The removed edge
        edge: EdgeId,
    },
    /// The whole content was replaced (undo, redo, reload)
    Reset,
}

type ObserverFn = Arc<dyn Fn(&StructuralChange) + Send + Sync>;

/// Registered observers. Observers belong to one container instance and are
/// neither cloned nor persisted.
#[derive(Default)]
struct Observers {
    next_id: ObserverId,
    callbacks: Vec<(ObserverId, ObserverFn)>,
}

impl Clone for Observers {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.callbacks.len())
            .finish()
    }
}

/// A Joint graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointGraph {
    /// Graph name
    pub name: String,
    /// Node arena in insertion order
    nodes: IndexMap<NodeId, Node>,
    /// Top level nodes in order
    roots: Vec<NodeId>,
    /// Edges in insertion order
    edges: IndexMap<EdgeId, Edge>,
    /// Unsaved changes
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    observers: Observers,
}

impl JointGraph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            roots: Vec::new(),
            edges: IndexMap::new(),
            dirty: false,
            observers: Observers::default(),
        }
    }

    // ------------------------------------------------------------------
    // Observers and dirty state
    // ------------------------------------------------------------------

    /// Register a callback invoked after every structural change
    pub fn on_structural_change<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&StructuralChange) + Send + Sync + 'static,
    {
        let id = self.observers.next_id;
        self.observers.next_id += 1;
        self.observers.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Unregister a callback
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.callbacks.len();
        self.observers.callbacks.retain(|(observer, _)| *observer != id);
        before != self.observers.callbacks.len()
    }

    fn changed(&mut self, change: StructuralChange) {
        self.dirty = true;
        for (_, callback) in &self.observers.callbacks {
            callback(&change);
        }
    }

    /// Whether the graph has unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the graph as having unsaved changes
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the unsaved changes flag (after a save)
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Replace name, nodes, roots and edges with those of `other`.
    /// Observers stay registered and receive [`StructuralChange::Reset`].
    pub fn replace_with(&mut self, other: JointGraph) {
        self.name = other.name;
        self.nodes = other.nodes;
        self.roots = other.roots;
        self.edges = other.edges;
        self.changed(StructuralChange::Reset);
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))
    }

    fn require(&self, node_id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))
    }

    /// Whether the node is in this graph
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Insertion position of a node in the arena
    pub fn insertion_index(&self, node_id: NodeId) -> Option<usize> {
        self.nodes.get_index_of(&node_id)
    }

    /// Top level nodes in order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Whether the node is a top level node
    pub fn is_root(&self, node_id: NodeId) -> bool {
        self.roots.contains(&node_id)
    }

    /// First node with the given name, in insertion order
    pub fn find_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.name == name)
    }

    // ------------------------------------------------------------------
    // Ownership tree
    // ------------------------------------------------------------------

    fn check_fresh(&self, node: &Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::InvalidHierarchy(format!(
                "node {} is already owned by this graph",
                node.id
            )));
        }
        if node.parent.is_some() {
            return Err(GraphError::InvalidHierarchy(format!(
                "node {} already has an owner",
                node.id
            )));
        }
        if !node.sub_nodes.is_empty() {
            return Err(GraphError::InvalidHierarchy(format!(
                "node {} carries sub-node ids; add children through add_sub_node",
                node.id
            )));
        }
        Ok(())
    }

    /// Add a top level node
    pub fn add_root(&mut self, node: Node) -> Result<NodeId, GraphError> {
        self.check_fresh(&node)?;
        let id = node.id;
        self.nodes.insert(id, node);
        self.roots.push(id);
        self.changed(StructuralChange::NodeAdded { node: id, parent: None });
        Ok(id)
    }

    /// Add a fresh node as a sub-node of `parent` at `index` (clamped)
    pub fn add_sub_node(&mut self, parent: NodeId, mut child: Node, index: usize) -> Result<NodeId, GraphError> {
        self.require(parent)?;
        self.check_fresh(&child)?;
        let id = child.id;
        child.parent = Some(parent);
        self.nodes.insert(id, child);
        let siblings = &mut self.node_mut(parent)?.sub_nodes;
        let index = index.min(siblings.len());
        siblings.insert(index, id);
        self.changed(StructuralChange::NodeAdded {
            node: id,
            parent: Some(parent),
        });
        Ok(id)
    }

    /// Move an existing node under `new_parent` (or to the roots when `None`)
    pub fn move_sub_node(
        &mut self,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        index: usize,
    ) -> Result<(), GraphError> {
        self.require(node_id)?;
        if let Some(parent) = new_parent {
            self.require(parent)?;
            if parent == node_id || self.is_ancestor_of(node_id, parent) {
                return Err(GraphError::InvalidHierarchy(format!(
                    "moving {node_id} under {parent} would create an ownership cycle"
                )));
            }
        }

        self.detach(node_id)?;
        let index = match new_parent {
            Some(parent) => {
                let siblings = &mut self.node_mut(parent)?.sub_nodes;
                let index = index.min(siblings.len());
                siblings.insert(index, node_id);
                index
            }
            None => {
                let index = index.min(self.roots.len());
                self.roots.insert(index, node_id);
                index
            }
        };
        self.node_mut(node_id)?.parent = new_parent;
        self.changed(StructuralChange::NodeMoved {
            node: node_id,
            parent: new_parent,
            index,
        });
        Ok(())
    }

    /// Unlink a node from its current owner without touching its subtree
    fn detach(&mut self, node_id: NodeId) -> Result<(), GraphError> {
        match self.require(node_id)?.parent {
            Some(parent) => {
                self.node_mut(parent)?.sub_nodes.retain(|c| *c != node_id);
            }
            None => self.roots.retain(|r| *r != node_id),
        }
        Ok(())
    }

    /// Detach `child` from `parent` and destroy its whole subtree
    pub fn remove_sub_node(&mut self, parent: NodeId, child: NodeId) -> Result<Vec<NodeId>, GraphError> {
        self.require(parent)?;
        if self.require(child)?.parent != Some(parent) {
            return Err(GraphError::InvalidHierarchy(format!(
                "node {child} is not a sub-node of {parent}"
            )));
        }
        self.detach(child)?;
        Ok(self.destroy_subtree(child))
    }

    /// Remove a top level node and its subtree
    pub fn remove_root(&mut self, root: NodeId) -> Result<Vec<NodeId>, GraphError> {
        self.require(root)?;
        if !self.is_root(root) {
            return Err(GraphError::InvalidHierarchy(format!("node {root} is not a root")));
        }
        self.detach(root)?;
        Ok(self.destroy_subtree(root))
    }

    /// Remove any node and its subtree
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        match self.require(node_id)?.parent {
            Some(parent) => self.remove_sub_node(parent, node_id),
            None => self.remove_root(node_id),
        }
    }

    fn destroy_subtree(&mut self, root: NodeId) -> Vec<NodeId> {
        let removed = self.subtree(root);
        let doomed: HashSet<NodeId> = removed.iter().copied().collect();
        self.edges
            .retain(|_, e| !doomed.contains(&e.from.node) && !doomed.contains(&e.to.node));
        for id in &removed {
            self.nodes.shift_remove(id);
        }
        tracing::debug!(root = %root, count = removed.len(), "Destroyed subtree");
        self.changed(StructuralChange::NodesRemoved {
            nodes: removed.clone(),
        });
        removed
    }

    /// Owning parent of a node
    pub fn parent_of(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(&node_id).and_then(|n| n.parent)
    }

    /// Direct sub-nodes in order
    pub fn sub_nodes(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node_id)
            .map(|n| n.sub_nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Ancestors of a node, closest first
    pub fn ancestors(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.parent_of(node_id);
        while let Some(parent) = current {
            // Guard against corrupted parent links
            if chain.contains(&parent) || parent == node_id {
                break;
            }
            chain.push(parent);
            current = self.parent_of(parent);
        }
        chain
    }

    /// The top level ancestor of a node, or the node itself for roots
    pub fn parentmost(&self, node_id: NodeId) -> NodeId {
        self.ancestors(node_id).last().copied().unwrap_or(node_id)
    }

    /// Whether `ancestor` owns `node_id` directly or transitively
    pub fn is_ancestor_of(&self, ancestor: NodeId, node_id: NodeId) -> bool {
        self.ancestors(node_id).contains(&ancestor)
    }

    /// All descendants in pre-order, excluding the node itself
    pub fn descendants(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = self.subtree(node_id);
        if !out.is_empty() {
            out.remove(0);
        }
        out
    }

    /// The node and all of its descendants in pre-order
    pub fn subtree(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            stack.extend(node.sub_nodes.iter().rev().copied());
        }
        out
    }

    /// Fragments below `node_id` carrying a tag matching `tag`
    pub fn find_fragments_with_tag(&self, node_id: NodeId, tag: &NodeTag, exact: bool) -> Vec<NodeId> {
        self.descendants(node_id)
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.has_tag(tag, exact)))
            .collect()
    }

    /// Fragments below `node_id` carrying any of `tags`
    pub fn find_fragments_with_any_tags(&self, node_id: NodeId, tags: &[NodeTag], exact: bool) -> Vec<NodeId> {
        self.descendants(node_id)
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| tags.iter().any(|t| n.has_tag(t, exact)))
            })
            .collect()
    }

    /// Fragments below `node_id` carrying all of `tags`
    pub fn find_fragments_with_all_tags(&self, node_id: NodeId, tags: &[NodeTag], exact: bool) -> Vec<NodeId> {
        self.descendants(node_id)
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| tags.iter().all(|t| n.has_tag(t, exact)))
            })
            .collect()
    }

    /// Fragments below `node_id` in the given category
    pub fn find_fragments_by_category(&self, node_id: NodeId, category: &str) -> Vec<NodeId> {
        self.descendants(node_id)
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.category == category))
            .collect()
    }

    /// A direct sub-node of `node_id` with the given id.
    ///
    /// Only direct children are searched, not the sub-nodes' own sub-nodes.
    pub fn find_fragment_by_id(&self, node_id: NodeId, fragment: NodeId) -> Option<&Node> {
        self.sub_nodes(node_id)
            .iter()
            .find(|id| **id == fragment)
            .and_then(|id| self.nodes.get(id))
    }

    // ------------------------------------------------------------------
    // Node data
    // ------------------------------------------------------------------

    /// Store a value on a data port, converting numeric types
    pub fn set_port_value(&mut self, node_id: NodeId, port_id: PortId, value: PortValue) -> Result<(), GraphError> {
        let port = self
            .node_mut(node_id)?
            .port_mut(&port_id)
            .ok_or(GraphError::PortNotFound(port_id))?;
        let found = value.port_type();
        let coerced = value.coerce_to(&port.port_type).ok_or_else(|| GraphError::TypeMismatch {
            expected: port.port_type.clone(),
            found,
        })?;
        port.value = Some(coerced);
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(())
    }

    /// Read a data port value as `expected`
    pub fn get_port_value(
        &self,
        node_id: NodeId,
        port_id: PortId,
        expected: &PortType,
    ) -> Result<Option<PortValue>, GraphError> {
        let port = self
            .require(node_id)?
            .port(&port_id)
            .ok_or(GraphError::PortNotFound(port_id))?;
        if expected.is_flow() || !port.port_type.can_connect_to(expected) {
            return Err(GraphError::TypeMismatch {
                expected: expected.clone(),
                found: port.port_type.clone(),
            });
        }
        match &port.value {
            Some(value) => value
                .clone()
                .coerce_to(expected)
                .map(Some)
                .ok_or_else(|| GraphError::TypeMismatch {
                    expected: expected.clone(),
                    found: value.port_type(),
                }),
            None => Ok(None),
        }
    }

    /// Write a named property. Once set, a property keeps its type.
    pub fn set_property(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        value: PortValue,
    ) -> Result<(), GraphError> {
        let name = name.into();
        let node = self.node_mut(node_id)?;
        let value = match node.properties.get(&name) {
            Some(existing) => {
                let expected = existing.port_type();
                let found = value.port_type();
                value
                    .coerce_to(&expected)
                    .ok_or(GraphError::TypeMismatch { expected, found })?
            }
            None => value,
        };
        node.properties.insert(name, value);
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(())
    }

    /// Read a named property
    pub fn property(&self, node_id: NodeId, name: &str) -> Option<&PortValue> {
        self.nodes.get(&node_id).and_then(|n| n.properties.get(name))
    }

    /// Rename a node
    pub fn rename_node(&mut self, node_id: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        self.node_mut(node_id)?.name = name.into();
        self.changed(StructuralChange::NodeRenamed { node: node_id });
        Ok(())
    }

    /// Replace a node's tags
    pub fn set_tags(&mut self, node_id: NodeId, tags: Vec<NodeTag>) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        node.tags.clear();
        for tag in tags {
            if !tag.is_empty() && !node.tags.contains(&tag) {
                node.tags.push(tag);
            }
        }
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(())
    }

    /// Move a node in the editor
    pub fn set_position(&mut self, node_id: NodeId, position: [f32; 2]) -> Result<(), GraphError> {
        self.node_mut(node_id)?.position = position;
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(())
    }

    /// Collapse or expand a node in the editor
    pub fn set_collapsed(&mut self, node_id: NodeId, collapsed: bool) -> Result<(), GraphError> {
        self.node_mut(node_id)?.collapsed = collapsed;
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(())
    }

    /// Append a port to a node
    pub fn add_port(&mut self, node_id: NodeId, port: Port) -> Result<PortId, GraphError> {
        let node = self.node_mut(node_id)?;
        if node.port(&port.id).is_some() {
            return Err(GraphError::IncompatiblePorts(format!(
                "port {:?} already exists on {node_id}",
                port.id
            )));
        }
        let id = port.id;
        node.ports.push(port);
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(id)
    }

    /// Remove a port and every edge attached to it
    pub fn remove_port(&mut self, node_id: NodeId, port_id: PortId) -> Result<Port, GraphError> {
        let node = self.node_mut(node_id)?;
        let index = node
            .ports
            .iter()
            .position(|p| p.id == port_id)
            .ok_or(GraphError::PortNotFound(port_id))?;
        let port = node.ports.remove(index);
        self.disconnect_port(PortRef::new(node_id, port_id));
        self.changed(StructuralChange::NodeDataChanged { node: node_id });
        Ok(port)
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    fn resolve_port(&self, port: PortRef) -> Result<&Port, GraphError> {
        self.require(port.node)?
            .port(&port.port)
            .ok_or(GraphError::PortNotFound(port.port))
    }

    /// Put a pair of port references into output -> input order
    fn orient(&self, a: PortRef, b: PortRef) -> Result<(PortRef, PortRef), GraphError> {
        let port_a = self.resolve_port(a)?;
        let port_b = self.resolve_port(b)?;
        if a == b {
            return Err(GraphError::IncompatiblePorts(
                "cannot connect a port to itself".to_string(),
            ));
        }
        match (port_a.direction, port_b.direction) {
            (PortDirection::Output, PortDirection::Input) => Ok((a, b)),
            (PortDirection::Input, PortDirection::Output) => Ok((b, a)),
            (PortDirection::Output, PortDirection::Output) => Err(GraphError::IncompatiblePorts(
                "cannot connect two outputs".to_string(),
            )),
            (PortDirection::Input, PortDirection::Input) => Err(GraphError::IncompatiblePorts(
                "cannot connect two inputs".to_string(),
            )),
        }
    }

    /// Check whether `from` and `to` could be connected right now
    pub fn can_connect(&self, from: PortRef, to: PortRef) -> Result<(PortRef, PortRef), GraphError> {
        let (from, to) = self.orient(from, to)?;
        let source = self.resolve_port(from)?;
        let target = self.resolve_port(to)?;

        if !source.can_connect(target) {
            return Err(GraphError::IncompatiblePorts(format!(
                "{:?} cannot connect to {:?}",
                source.port_type, target.port_type
            )));
        }
        if self.edges.values().any(|e| e.joins(from, to)) {
            return Err(GraphError::DuplicateEdge);
        }
        if source.exclusive && self.edges.values().any(|e| e.from == from) {
            return Err(GraphError::ExclusivityViolation(from.port));
        }
        if target.exclusive && self.edges.values().any(|e| e.to == to) {
            return Err(GraphError::ExclusivityViolation(to.port));
        }
        Ok((from, to))
    }

    /// Add an edge between two ports (either order)
    pub fn connect(&mut self, from: PortRef, to: PortRef, priority: i32) -> Result<EdgeId, GraphError> {
        let (from, to) = self.can_connect(from, to)?;
        let edge = Edge::new(from, to, priority);
        let id = edge.id;
        self.edges.insert(id, edge);
        self.changed(StructuralChange::Connected { edge: id });
        Ok(id)
    }

    /// Add an edge, first breaking edges that would violate exclusivity
    pub fn connect_replacing(&mut self, from: PortRef, to: PortRef, priority: i32) -> Result<EdgeId, GraphError> {
        let (from, to) = self.orient(from, to)?;
        let source_exclusive = self.resolve_port(from)?.exclusive;
        let target_exclusive = self.resolve_port(to)?.exclusive;
        if source_exclusive {
            self.disconnect_port(from);
        }
        if target_exclusive {
            self.disconnect_port(to);
        }
        self.connect(from, to, priority)
    }

    /// Remove the edges joining two ports. Removing a missing edge is a no-op.
    pub fn disconnect(&mut self, from: PortRef, to: PortRef) -> bool {
        let removed: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.joins(from, to) || e.joins(to, from))
            .map(|e| e.id)
            .collect();
        for id in &removed {
            self.edges.shift_remove(id);
            self.changed(StructuralChange::Disconnected { edge: *id });
        }
        !removed.is_empty()
    }

    /// Remove an edge by ID
    pub fn disconnect_edge(&mut self, edge_id: EdgeId) -> Option<Edge> {
        let edge = self.edges.shift_remove(&edge_id)?;
        self.changed(StructuralChange::Disconnected { edge: edge_id });
        Some(edge)
    }

    /// Remove every edge attached to a port, returning how many were removed
    pub fn disconnect_port(&mut self, port: PortRef) -> usize {
        let removed: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.from == port || e.to == port)
            .map(|e| e.id)
            .collect();
        for id in &removed {
            self.edges.shift_remove(id);
            self.changed(StructuralChange::Disconnected { edge: *id });
        }
        removed.len()
    }

    /// Get an edge by ID
    pub fn edge(&self, edge_id: EdgeId) -> Option<&Edge> {
        self.edges.get(&edge_id)
    }

    /// Get all edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges leaving a node, in insertion order.
    ///
    /// The iterator is lazy and `Clone`, so callers can restart it.
    pub fn outgoing_edges(&self, node_id: NodeId) -> impl Iterator<Item = &Edge> + Clone + '_ {
        self.edges.values().filter(move |e| e.from.node == node_id)
    }

    /// Edges entering a node, in insertion order
    pub fn incoming_edges(&self, node_id: NodeId) -> impl Iterator<Item = &Edge> + Clone + '_ {
        self.edges.values().filter(move |e| e.to.node == node_id)
    }

    /// Edges leaving a specific port
    pub fn edges_from_port(&self, port: PortRef) -> impl Iterator<Item = &Edge> + Clone + '_ {
        self.edges.values().filter(move |e| e.from == port)
    }

    /// Edges entering a specific port
    pub fn edges_to_port(&self, port: PortRef) -> impl Iterator<Item = &Edge> + Clone + '_ {
        self.edges.values().filter(move |e| e.to == port)
    }

    /// Downstream nodes in edge insertion order
    pub fn downstream(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + Clone + '_ {
        self.outgoing_edges(node_id).map(|e| e.to.node)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Full structural check. Every violation is reported; nothing fails fast.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (key, node) in &self.nodes {
            if *key != node.id {
                violations.push(Violation::IdMismatch {
                    key: *key,
                    node: node.id,
                });
            }
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        for root in &self.roots {
            let Some(node) = self.nodes.get(root) else {
                violations.push(Violation::MissingRoot(*root));
                continue;
            };
            if !visited.insert(*root) {
                violations.push(Violation::MultipleOwners(*root));
                continue;
            }
            if node.parent.is_some() {
                violations.push(Violation::ParentMismatch {
                    node: *root,
                    recorded: node.parent,
                    actual: None,
                });
            }
            let mut path = vec![*root];
            self.validate_children(*root, &mut path, &mut visited, &mut violations);
        }

        for id in self.nodes.keys() {
            if !visited.contains(id) {
                violations.push(Violation::Unreachable(*id));
            }
        }

        let mut port_usage: HashMap<PortRef, usize> = HashMap::new();
        for edge in self.edges.values() {
            let mut endpoints_ok = true;
            for endpoint in [edge.from, edge.to] {
                match self.nodes.get(&endpoint.node) {
                    None => {
                        violations.push(Violation::DanglingEdge {
                            edge: edge.id,
                            node: endpoint.node,
                        });
                        endpoints_ok = false;
                    }
                    Some(node) if node.port(&endpoint.port).is_none() => {
                        violations.push(Violation::UnknownPort {
                            edge: edge.id,
                            port: endpoint.port,
                        });
                        endpoints_ok = false;
                    }
                    Some(_) => *port_usage.entry(endpoint).or_default() += 1,
                }
            }
            if endpoints_ok {
                if let (Ok(source), Ok(target)) = (self.resolve_port(edge.from), self.resolve_port(edge.to)) {
                    let oriented =
                        source.direction == PortDirection::Output && target.direction == PortDirection::Input;
                    if !oriented || !source.can_connect(target) {
                        violations.push(Violation::IncompatibleEdge(edge.id));
                    }
                }
            }
        }

        for (port_ref, count) in port_usage {
            if count < 2 {
                continue;
            }
            if let Ok(port) = self.resolve_port(port_ref) {
                if port.exclusive {
                    violations.push(Violation::ExclusivityBreached {
                        port: port_ref.port,
                        edges: count,
                    });
                }
            }
        }

        violations
    }

    fn validate_children(
        &self,
        parent: NodeId,
        path: &mut Vec<NodeId>,
        visited: &mut HashSet<NodeId>,
        violations: &mut Vec<Violation>,
    ) {
        let Some(node) = self.nodes.get(&parent) else {
            return;
        };
        for child in &node.sub_nodes {
            let Some(child_node) = self.nodes.get(child) else {
                violations.push(Violation::MissingSubNode {
                    parent,
                    child: *child,
                });
                continue;
            };
            if path.contains(child) {
                violations.push(Violation::OwnershipCycle(*child));
                continue;
            }
            if !visited.insert(*child) {
                violations.push(Violation::MultipleOwners(*child));
                continue;
            }
            if child_node.parent != Some(parent) {
                violations.push(Violation::ParentMismatch {
                    node: *child,
                    recorded: child_node.parent,
                    actual: Some(parent),
                });
            }
            path.push(*child);
            self.validate_children(*child, path, visited, violations);
            path.pop();
        }
    }
}

impl Default for JointGraph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Structural equality: name, node arena, root order and edge order.
/// Dirty state and observers are ignored.
impl PartialEq for JointGraph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.roots == other.roots
            && self.nodes.len() == other.nodes.len()
            && self.nodes.iter().eq(other.nodes.iter())
            && self.edges.len() == other.edges.len()
            && self.edges.iter().eq(other.edges.iter())
    }
}

/// Error returned by authoring operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not found
    #[error("Port not found: {0:?}")]
    PortNotFound(PortId),

    /// Ownership tree rule broken
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// Value type does not fit the port or property
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Type required by the target
        expected: PortType,
        /// Type supplied
        found: PortType,
    },

    /// Port directions or types disagree
    #[error("Incompatible ports: {0}")]
    IncompatiblePorts(String),

    /// Exclusive port already has an edge
    #[error("Exclusive port already connected: {0:?}")]
    ExclusivityViolation(PortId),

    /// The two ports are already joined
    #[error("Ports are already connected")]
    DuplicateEdge,
}

/// A structural problem reported by [`JointGraph::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// Arena key differs from the stored node id
    #[error("arena key {key} holds node {node}")]
    IdMismatch {
        /// Arena key
        key: NodeId,
        /// Id stored in the node
        node: NodeId,
    },
    /// Root list references a missing node
    #[error("root {0} does not exist")]
    MissingRoot(NodeId),
    /// Sub-node list references a missing node
    #[error("{parent} owns missing sub-node {child}")]
    MissingSubNode {
        /// Owner
        parent: NodeId,
        /// Missing child
        child: NodeId,
    },
    /// Node not reachable from any root
    #[error("node {0} is not reachable from any root")]
    Unreachable(NodeId),
    /// Node reachable through more than one owner
    #[error("node {0} is owned more than once")]
    MultipleOwners(NodeId),
    /// Recorded parent differs from the owning node
    #[error("node {node} records parent {recorded:?} but is owned by {actual:?}")]
    ParentMismatch {
        /// The node
        node: NodeId,
        /// Parent stored on the node
        recorded: Option<NodeId>,
        /// Parent found while walking the tree
        actual: Option<NodeId>,
    },
    /// Ownership loop
    #[error("ownership cycle through {0}")]
    OwnershipCycle(NodeId),
    /// Edge endpoint node missing
    #[error("edge {edge:?} references missing node {node}")]
    DanglingEdge {
        /// The edge
        edge: EdgeId,
        /// Missing node
        node: NodeId,
    },
    /// Edge endpoint port missing
    #[error("edge {edge:?} references missing port {port:?}")]
    UnknownPort {
        /// The edge
        edge: EdgeId,
        /// Missing port
        port: PortId,
    },
    /// Edge joins ports that cannot connect
    #[error("edge {0:?} joins incompatible ports")]
    IncompatibleEdge(EdgeId),
    /// Exclusive port has several edges
    #[error("exclusive port {port:?} has {edges} edges")]
    ExclusivityBreached {
        /// The port
        port: PortId,
        /// Edge count
        edges: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FLOW_CONTINUE, FLOW_IN, FLOW_OUT};
    use std::sync::Mutex;

    fn flow_out(graph: &JointGraph, node: NodeId) -> PortRef {
        let port = graph.node(node).unwrap().continue_port().unwrap();
        PortRef::new(node, port.id)
    }

    fn flow_in(graph: &JointGraph, node: NodeId) -> PortRef {
        let port = graph.node(node).unwrap().flow_input().unwrap();
        PortRef::new(node, port.id)
    }

    #[test]
    fn test_add_and_remove_subtree() {
        let mut graph = JointGraph::new("Dialogue");
        let root = graph.add_root(Node::fragment("Root")).unwrap();
        let child = graph.add_sub_node(root, Node::fragment("Child"), 0).unwrap();
        let grandchild = graph.add_sub_node(child, Node::fragment("Grandchild"), 0).unwrap();
        let other = graph.add_root(Node::terminal("Other")).unwrap();
        graph.connect(flow_out(&graph, grandchild), flow_in(&graph, other), 0).unwrap();

        assert_eq!(graph.ancestors(grandchild), vec![child, root]);
        assert_eq!(graph.parentmost(grandchild), root);
        assert!(graph.is_dirty());

        let removed = graph.remove_sub_node(root, child).unwrap();
        assert_eq!(removed, vec![child, grandchild]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.sub_nodes(root).is_empty());
        assert!(graph.validate().is_empty());
    }

    #[test]
    fn test_sub_node_order_and_clamping() {
        let mut graph = JointGraph::default();
        let root = graph.add_root(Node::fragment("Root")).unwrap();
        let a = graph.add_sub_node(root, Node::fragment("A"), 0).unwrap();
        let c = graph.add_sub_node(root, Node::fragment("C"), 99).unwrap();
        let b = graph.add_sub_node(root, Node::fragment("B"), 1).unwrap();
        assert_eq!(graph.sub_nodes(root), &[a, b, c]);
    }

    #[test]
    fn test_add_sub_node_rejects_owned_child() {
        let mut graph = JointGraph::default();
        let root = graph.add_root(Node::fragment("Root")).unwrap();
        let child = Node::fragment("Child");
        let duplicate = child.clone();
        graph.add_sub_node(root, child, 0).unwrap();

        let err = graph.add_sub_node(root, duplicate, 0).unwrap_err();
        assert!(matches!(err, GraphError::InvalidHierarchy(_)));

        let mut foreign = Node::fragment("Foreign");
        foreign.parent = Some(NodeId::new());
        assert!(matches!(
            graph.add_sub_node(root, foreign, 0),
            Err(GraphError::InvalidHierarchy(_))
        ));
    }

    #[test]
    fn test_move_rejects_ownership_cycle() {
        let mut graph = JointGraph::default();
        let root = graph.add_root(Node::fragment("Root")).unwrap();
        let child = graph.add_sub_node(root, Node::fragment("Child"), 0).unwrap();
        let grandchild = graph.add_sub_node(child, Node::fragment("Grandchild"), 0).unwrap();

        assert!(matches!(
            graph.move_sub_node(root, Some(grandchild), 0),
            Err(GraphError::InvalidHierarchy(_))
        ));
        assert!(matches!(
            graph.move_sub_node(child, Some(child), 0),
            Err(GraphError::InvalidHierarchy(_))
        ));

        // Promote the grandchild to a root, then re-attach it
        graph.move_sub_node(grandchild, None, 0).unwrap();
        assert_eq!(graph.roots(), &[grandchild, root]);
        assert_eq!(graph.parent_of(grandchild), None);
        graph.move_sub_node(grandchild, Some(root), 0).unwrap();
        assert_eq!(graph.sub_nodes(root), &[grandchild, child]);
        assert!(graph.validate().is_empty());
    }

    #[test]
    fn test_connect_rules() {
        let mut graph = JointGraph::default();
        let event = graph.add_root(Node::event("Greet", "Npc.Greet")).unwrap();
        let first = graph.add_root(Node::action("Say Hi", "say")).unwrap();
        let second = graph.add_root(Node::action("Wave", "wave")).unwrap();

        let out = flow_out(&graph, event);
        graph.connect(out, flow_in(&graph, first), 0).unwrap();

        // Event output is exclusive
        assert_eq!(
            graph.connect(out, flow_in(&graph, second), 0),
            Err(GraphError::ExclusivityViolation(out.port))
        );
        // Output to output
        assert!(matches!(
            graph.connect(out, flow_out(&graph, second), 0),
            Err(GraphError::IncompatiblePorts(_))
        ));
        // Same pair twice
        assert!(matches!(
            graph.connect(flow_out(&graph, first), flow_in(&graph, second), 0),
            Ok(_)
        ));
        assert_eq!(
            graph.connect(flow_in(&graph, second), flow_out(&graph, first), 0),
            Err(GraphError::DuplicateEdge)
        );
    }

    #[test]
    fn test_connect_type_mismatch() {
        let mut graph = JointGraph::default();
        let a = graph
            .add_root(Node::fragment("A").with_port(Port::output("Name", PortType::String)))
            .unwrap();
        let b = graph
            .add_root(Node::fragment("B").with_port(Port::input("Count", PortType::Int)))
            .unwrap();
        let from = PortRef::new(a, graph.node(a).unwrap().port_named("Name", PortDirection::Output).unwrap().id);
        let to = PortRef::new(b, graph.node(b).unwrap().port_named("Count", PortDirection::Input).unwrap().id);
        assert!(matches!(graph.connect(from, to, 0), Err(GraphError::IncompatiblePorts(_))));
        // Flow never mixes with data
        assert!(matches!(
            graph.connect(flow_out(&graph, a), to, 0),
            Err(GraphError::IncompatiblePorts(_))
        ));
    }

    #[test]
    fn test_connect_replacing_breaks_exclusive_edges() {
        let mut graph = JointGraph::default();
        let a = graph.add_root(Node::action("A", "noop")).unwrap();
        let b = graph.add_root(Node::terminal("B")).unwrap();
        let c = graph.add_root(Node::terminal("C")).unwrap();
        let out = flow_out(&graph, a);
        graph.connect(out, flow_in(&graph, b), 0).unwrap();
        graph.connect_replacing(out, flow_in(&graph, c), 0).unwrap();
        let targets: Vec<_> = graph.downstream(a).collect();
        assert_eq!(targets, vec![c]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut graph = JointGraph::default();
        let a = graph.add_root(Node::fragment("A")).unwrap();
        let b = graph.add_root(Node::fragment("B")).unwrap();
        let c = graph.add_root(Node::fragment("C")).unwrap();
        let (ab_from, ab_to) = (flow_out(&graph, a), flow_in(&graph, b));
        graph.connect(ab_from, ab_to, 0).unwrap();
        graph.connect(flow_out(&graph, a), flow_in(&graph, c), 0).unwrap();

        assert!(graph.disconnect(ab_from, ab_to));
        let after_first: Vec<Edge> = graph.edges().cloned().collect();
        assert!(!graph.disconnect(ab_from, ab_to));
        assert!(!graph.disconnect(ab_from, ab_to));
        let after_repeat: Vec<Edge> = graph.edges().cloned().collect();
        assert_eq!(after_first, after_repeat);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_outgoing_edges_order_and_restart() {
        let mut graph = JointGraph::default();
        let hub = graph.add_root(Node::fragment("Hub")).unwrap();
        let targets: Vec<NodeId> = (0..3)
            .map(|i| graph.add_root(Node::terminal(format!("T{i}"))).unwrap())
            .collect();
        for target in targets.iter().rev() {
            graph.connect(flow_out(&graph, hub), flow_in(&graph, *target), 0).unwrap();
        }
        let edges = graph.outgoing_edges(hub);
        let first: Vec<NodeId> = edges.clone().map(|e| e.to.node).collect();
        let second: Vec<NodeId> = edges.map(|e| e.to.node).collect();
        let expected: Vec<NodeId> = targets.iter().rev().copied().collect();
        assert_eq!(first, expected);
        assert_eq!(first, second);
    }

    #[test]
    fn test_port_values_and_properties() {
        let mut graph = JointGraph::default();
        let node = graph
            .add_root(
                Node::fragment("Timer")
                    .with_port(Port::input("Seconds", PortType::Float))
                    .with_property("label", "Countdown"),
            )
            .unwrap();
        let seconds = graph.node(node).unwrap().port_named("Seconds", PortDirection::Input).unwrap().id;

        graph.set_port_value(node, seconds, PortValue::Int(3)).unwrap();
        assert_eq!(
            graph.get_port_value(node, seconds, &PortType::Float).unwrap(),
            Some(PortValue::Float(3.0))
        );
        assert!(matches!(
            graph.set_port_value(node, seconds, PortValue::from("soon")),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert!(matches!(
            graph.get_port_value(node, seconds, &PortType::String),
            Err(GraphError::TypeMismatch { .. })
        ));

        let flow = graph.node(node).unwrap().port_named(FLOW_IN, PortDirection::Input).unwrap().id;
        assert!(matches!(
            graph.set_port_value(node, flow, PortValue::Bool(true)),
            Err(GraphError::TypeMismatch { .. })
        ));

        graph.set_property(node, "label", PortValue::from("Timer")).unwrap();
        assert!(matches!(
            graph.set_property(node, "label", PortValue::Bool(false)),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert_eq!(graph.property(node, "label"), Some(&PortValue::from("Timer")));
    }

    #[test]
    fn test_fragment_queries() {
        let mut graph = JointGraph::default();
        let root = graph.add_root(Node::fragment("Line")).unwrap();
        let speaker = graph
            .add_sub_node(root, Node::fragment("Speaker").with_tag("Dialogue.Speaker.Npc"), 0)
            .unwrap();
        let nested = graph
            .add_sub_node(speaker, Node::fragment("Voice").with_tag("Dialogue.Voice"), 0)
            .unwrap();

        let tag = NodeTag::new("Dialogue.Speaker");
        assert_eq!(graph.find_fragments_with_tag(root, &tag, false), vec![speaker]);
        assert!(graph.find_fragments_with_tag(root, &tag, true).is_empty());
        assert_eq!(
            graph.find_fragments_with_any_tags(root, &[tag.clone(), NodeTag::new("Dialogue.Voice")], false),
            vec![speaker, nested]
        );
        assert!(graph
            .find_fragments_with_all_tags(root, &[tag, NodeTag::new("Dialogue.Voice")], false)
            .is_empty());
        assert!(graph.find_fragment_by_id(root, speaker).is_some());
        assert!(graph.find_fragment_by_id(root, nested).is_none());
        assert_eq!(graph.find_fragments_by_category(root, "Fragment").len(), 2);
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let mut graph = JointGraph::default();
        let a = graph.add_root(Node::fragment("A")).unwrap();
        let b = graph.add_sub_node(a, Node::fragment("B"), 0).unwrap();

        // Corrupt the tree behind the API's back: cycle, orphan and dangling edge
        graph.nodes.get_mut(&b).unwrap().sub_nodes.push(a);
        let mut orphan = Node::fragment("Orphan");
        let orphan_id = orphan.id;
        orphan.parent = None;
        graph.nodes.insert(orphan_id, orphan);
        let ghost = NodeId::new();
        let edge = Edge::new(flow_out(&graph, a), PortRef::new(ghost, PortId::new()), 0);
        let edge_id = edge.id;
        graph.edges.insert(edge_id, edge);

        let violations = graph.validate();
        assert!(violations.contains(&Violation::OwnershipCycle(a)));
        assert!(violations.contains(&Violation::Unreachable(orphan_id)));
        assert!(violations.contains(&Violation::DanglingEdge { edge: edge_id, node: ghost }));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut graph = JointGraph::default();
        let sink = Arc::clone(&seen);
        let observer = graph.on_structural_change(move |change| sink.lock().unwrap().push(change.clone()));

        let root = graph.add_root(Node::fragment("Root")).unwrap();
        graph.rename_node(root, "Renamed").unwrap();
        assert!(graph.remove_observer(observer));
        graph.remove_root(root).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                StructuralChange::NodeAdded { node: root, parent: None },
                StructuralChange::NodeRenamed { node: root },
            ]
        );
    }

    #[test]
    fn test_replace_with_keeps_observers() {
        let resets = Arc::new(Mutex::new(0));
        let mut graph = JointGraph::new("Live");
        let sink = Arc::clone(&resets);
        graph.on_structural_change(move |change| {
            if *change == StructuralChange::Reset {
                *sink.lock().unwrap() += 1;
            }
        });

        let mut other = JointGraph::new("Loaded");
        let root = other.add_root(Node::fragment("Root")).unwrap();
        graph.replace_with(other);

        assert_eq!(graph.name, "Loaded");
        assert_eq!(graph.roots(), &[root]);
        assert_eq!(*resets.lock().unwrap(), 1);
        graph.add_root(Node::fragment("Another")).unwrap();
        assert_eq!(*resets.lock().unwrap(), 1);
    }

    #[test]
    fn test_structural_equality_ignores_dirty() {
        let mut graph = JointGraph::new("Eq");
        graph.add_root(Node::action("A", "noop").as_terminal()).unwrap();
        let mut copy = graph.clone();
        copy.clear_dirty();
        assert_eq!(graph, copy);
        copy.name = "Other".to_string();
        assert_ne!(graph, copy);
    }

    #[test]
    fn test_port_names() {
        let graph_node = Node::event("E", "Tag");
        assert!(graph_node.port_named(FLOW_OUT, PortDirection::Output).is_some());
        let action = Node::action("A", "noop");
        assert!(action.port_named(FLOW_CONTINUE, PortDirection::Output).is_some());
    }
}
