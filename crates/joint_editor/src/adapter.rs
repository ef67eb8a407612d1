// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bridge between editor gestures and the graph container.
//!
//! The adapter keeps no graph state of its own. It derives a [`VisualGraph`]
//! (node cards with nested sub-node cards, pins and wires) from the
//! [`JointGraph`] and turns [`VisualEdit`]s into calls on the graph's
//! mutation API.

use joint::{
    EdgeId, GraphError, JointGraph, Node, NodeId, NodeRegistry, ObserverId, PortDirection, PortId, PortRef, PortType,
    PortValue,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Pin color for a port type
pub fn pin_color(port_type: &PortType) -> [u8; 3] {
    match port_type {
        PortType::Flow => [200, 200, 200],
        PortType::Bool => [200, 80, 80],
        PortType::Int => [80, 200, 200],
        PortType::Float => [80, 200, 80],
        PortType::String => [200, 180, 150],
        PortType::Tag => [255, 200, 100],
        PortType::NodeRef => [150, 200, 150],
        PortType::Any => [150, 150, 150],
        PortType::Custom(_) => [128, 128, 128],
    }
}

/// A pin drawn on a node card
#[derive(Debug, Clone, PartialEq)]
pub struct VisualPin {
    /// Underlying port
    pub port: PortId,
    /// Label
    pub name: String,
    /// Side of the card
    pub direction: PortDirection,
    /// Type shown on hover
    pub port_type: PortType,
    /// Pin color
    pub color: [u8; 3],
    /// Whether a wire is attached
    pub connected: bool,
}

/// A node card, with its sub-nodes drawn nested inside
#[derive(Debug, Clone, PartialEq)]
pub struct VisualNode {
    /// Node shown
    pub id: NodeId,
    /// Title bar text
    pub title: String,
    /// Kind label under the title
    pub subtitle: &'static str,
    /// Position in graph space
    pub position: [f32; 2],
    /// Whether only the title bar is drawn
    pub collapsed: bool,
    /// Tags shown as chips
    pub tags: Vec<String>,
    /// Pins in port order
    pub pins: Vec<VisualPin>,
    /// Nested sub-node cards in execution order
    pub sub_nodes: Vec<VisualNode>,
}

/// A wire between two pins
#[derive(Debug, Clone, PartialEq)]
pub struct VisualConnection {
    /// Underlying edge
    pub edge: EdgeId,
    /// Output pin
    pub from: PortRef,
    /// Input pin
    pub to: PortRef,
    /// Routing priority label
    pub priority: i32,
    /// Wire color
    pub color: [u8; 3],
}

/// Everything the editor draws for one graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualGraph {
    /// Root cards
    pub nodes: Vec<VisualNode>,
    /// Wires
    pub connections: Vec<VisualConnection>,
}

impl VisualGraph {
    /// Derive the visual model from a graph
    pub fn build(graph: &JointGraph) -> Self {
        let nodes = graph
            .roots()
            .iter()
            .filter_map(|root| Self::card(graph, *root))
            .collect();
        let connections = graph
            .edges()
            .map(|edge| {
                let color = graph
                    .node(edge.from.node)
                    .and_then(|n| n.port(&edge.from.port))
                    .map_or([128, 128, 128], |p| pin_color(&p.port_type));
                VisualConnection {
                    edge: edge.id,
                    from: edge.from,
                    to: edge.to,
                    priority: edge.priority,
                    color,
                }
            })
            .collect();
        Self { nodes, connections }
    }

    fn card(graph: &JointGraph, node_id: NodeId) -> Option<VisualNode> {
        let node = graph.node(node_id)?;
        let pins = node
            .ports
            .iter()
            .map(|port| {
                let port_ref = PortRef::new(node_id, port.id);
                VisualPin {
                    port: port.id,
                    name: port.name.clone(),
                    direction: port.direction,
                    port_type: port.port_type.clone(),
                    color: pin_color(&port.port_type),
                    connected: graph.edges().any(|e| e.from == port_ref || e.to == port_ref),
                }
            })
            .collect();
        Some(VisualNode {
            id: node_id,
            title: node.name.clone(),
            subtitle: node.kind.label(),
            position: node.position,
            collapsed: node.collapsed,
            tags: node.tags.iter().map(ToString::to_string).collect(),
            pins,
            sub_nodes: node
                .sub_nodes
                .iter()
                .filter_map(|child| Self::card(graph, *child))
                .collect(),
        })
    }

    /// Find a card anywhere in the tree
    pub fn find(&self, node_id: NodeId) -> Option<&VisualNode> {
        fn search(cards: &[VisualNode], node_id: NodeId) -> Option<&VisualNode> {
            cards.iter().find_map(|card| {
                if card.id == node_id {
                    Some(card)
                } else {
                    search(&card.sub_nodes, node_id)
                }
            })
        }
        search(&self.nodes, node_id)
    }

    /// Number of cards, nested ones included
    pub fn card_count(&self) -> usize {
        fn count(cards: &[VisualNode]) -> usize {
            cards.iter().map(|c| 1 + count(&c.sub_nodes)).sum()
        }
        count(&self.nodes)
    }
}

/// Editor gesture
#[derive(Debug, Clone, PartialEq)]
pub enum VisualEdit {
    /// Create a root node from a palette template
    AddNode {
        /// Template ID
        template: String,
        /// Drop position
        position: [f32; 2],
    },
    /// Create a sub-node from a palette template
    AddSubNode {
        /// Owner
        parent: NodeId,
        /// Template ID
        template: String,
        /// Index among the owner's sub-nodes
        index: usize,
    },
    /// Drag a node onto another owner, or out to the roots
    MoveSubNode {
        /// Dragged node
        node: NodeId,
        /// New owner, `None` for the roots
        parent: Option<NodeId>,
        /// Index among the new siblings
        index: usize,
    },
    /// Delete a node and its sub-nodes
    RemoveNode {
        /// Deleted node
        node: NodeId,
    },
    /// Drop a wire between two pins
    Connect {
        /// First pin
        from: PortRef,
        /// Second pin
        to: PortRef,
        /// Routing priority
        priority: i32,
        /// Break wires blocking an exclusive pin first
        replace: bool,
    },
    /// Cut the wire between two pins
    Disconnect {
        /// First pin
        from: PortRef,
        /// Second pin
        to: PortRef,
    },
    /// Rename a node
    Rename {
        /// Renamed node
        node: NodeId,
        /// New name
        name: String,
    },
    /// Drag a card
    MoveNode {
        /// Dragged node
        node: NodeId,
        /// New position
        position: [f32; 2],
    },
    /// Edit a property in the details panel
    SetProperty {
        /// Edited node
        node: NodeId,
        /// Property name
        name: String,
        /// New value
        value: PortValue,
    },
}

impl VisualEdit {
    /// Undo history label
    pub fn describe(&self) -> String {
        match self {
            Self::AddNode { template, .. } | Self::AddSubNode { template, .. } => format!("Add {template}"),
            Self::MoveSubNode { .. } => "Move sub-node".to_string(),
            Self::RemoveNode { .. } => "Remove node".to_string(),
            Self::Connect { .. } => "Connect".to_string(),
            Self::Disconnect { .. } => "Disconnect".to_string(),
            Self::Rename { name, .. } => format!("Rename to {name}"),
            Self::MoveNode { .. } => "Move node".to_string(),
            Self::SetProperty { name, .. } => format!("Set {name}"),
        }
    }
}

/// Result of a successful [`VisualEdit`]
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// A node was created
    NodeCreated(NodeId),
    /// Nodes were deleted
    NodesRemoved(Vec<NodeId>),
    /// A wire was created
    Connected(EdgeId),
    /// A wire was cut, `false` when none existed
    Disconnected(bool),
    /// Something else changed
    Updated,
}

/// Adapter error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The graph rejected the edit
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// No palette entry with this ID
    #[error("Unknown node template: {0}")]
    UnknownTemplate(String),
}

/// Answer to "may these two pins be wired"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResponse {
    /// The wire can be made
    Allow,
    /// The wire can be made after cutting these wires
    BreakOthers(Vec<EdgeId>),
    /// The wire is not allowed
    Disallow(String),
}

/// Answer to "may this node be dropped into that owner"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachResponse {
    /// The node can be attached
    Allow,
    /// The node cannot be attached
    Disallow(String),
}

/// Check whether two pins may be wired, with a reason when they may not
pub fn can_connect(graph: &JointGraph, a: PortRef, b: PortRef) -> ConnectResponse {
    if a == b {
        return ConnectResponse::Disallow("Both are on the same pin".to_string());
    }
    let port_of = |r: PortRef| graph.node(r.node).and_then(|n| n.port(&r.port));
    let (Some(port_a), Some(port_b)) = (port_of(a), port_of(b)) else {
        return ConnectResponse::Disallow("Pin no longer exists".to_string());
    };
    let (from, to, source, target) = match (port_a.direction, port_b.direction) {
        (PortDirection::Output, PortDirection::Input) => (a, b, port_a, port_b),
        (PortDirection::Input, PortDirection::Output) => (b, a, port_b, port_a),
        (PortDirection::Output, PortDirection::Output) => {
            return ConnectResponse::Disallow("Can't connect an output with another output".to_string());
        }
        (PortDirection::Input, PortDirection::Input) => {
            return ConnectResponse::Disallow("Can't connect an input with another input".to_string());
        }
    };
    if !source.port_type.can_connect_to(&target.port_type) {
        return ConnectResponse::Disallow(format!(
            "{:?} can't connect to {:?}",
            source.port_type, target.port_type
        ));
    }
    if graph.edges().any(|e| e.joins(from, to)) {
        return ConnectResponse::Disallow("Already connected".to_string());
    }

    let mut blocking: Vec<EdgeId> = Vec::new();
    if source.exclusive {
        blocking.extend(graph.edges_from_port(from).map(|e| e.id));
    }
    if target.exclusive {
        blocking.extend(graph.edges_to_port(to).map(|e| e.id));
    }
    if blocking.is_empty() {
        ConnectResponse::Allow
    } else {
        ConnectResponse::BreakOthers(blocking)
    }
}

/// Check whether `sub` may be attached under `parent`
pub fn can_attach(graph: &JointGraph, sub: NodeId, parent: NodeId) -> AttachResponse {
    if !graph.contains(sub) || !graph.contains(parent) {
        return AttachResponse::Disallow("Node no longer exists".to_string());
    }
    if sub == parent {
        return AttachResponse::Disallow("Can't attach a node to itself".to_string());
    }
    if graph.is_ancestor_of(sub, parent) {
        return AttachResponse::Disallow("Can't attach a node to its own sub-node".to_string());
    }
    AttachResponse::Allow
}

/// Translates editor gestures into graph mutations
pub struct EditorGraphAdapter {
    registry: NodeRegistry,
    visual: VisualGraph,
    stale: Arc<AtomicBool>,
    observer: Option<ObserverId>,
}

impl EditorGraphAdapter {
    /// Create an adapter with the given palette
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            visual: VisualGraph::default(),
            stale: Arc::new(AtomicBool::new(true)),
            observer: None,
        }
    }

    /// Listen for structural changes of `graph`
    pub fn attach(&mut self, graph: &mut JointGraph) {
        if let Some(previous) = self.observer.take() {
            graph.remove_observer(previous);
        }
        let stale = Arc::clone(&self.stale);
        self.observer = Some(graph.on_structural_change(move |_| stale.store(true, Ordering::Release)));
        self.stale.store(true, Ordering::Release);
    }

    /// Stop listening to `graph`
    pub fn detach(&mut self, graph: &mut JointGraph) {
        if let Some(observer) = self.observer.take() {
            graph.remove_observer(observer);
        }
    }

    /// Palette
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Whether the visual model needs a rebuild
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// The visual model, rebuilt if the graph changed since the last call
    pub fn visual(&mut self, graph: &JointGraph) -> &VisualGraph {
        if self.stale.swap(false, Ordering::AcqRel) {
            self.visual = VisualGraph::build(graph);
            tracing::trace!(cards = self.visual.card_count(), "Rebuilt visual graph");
        }
        &self.visual
    }

    fn instantiate(&self, template: &str) -> Result<Node, AdapterError> {
        self.registry
            .create_node(template)
            .ok_or_else(|| AdapterError::UnknownTemplate(template.to_string()))
    }

    /// Apply an editor gesture to the graph
    pub fn apply(&self, graph: &mut JointGraph, edit: VisualEdit) -> Result<EditOutcome, AdapterError> {
        tracing::debug!(edit = %edit.describe(), "Applying visual edit");
        let outcome = match edit {
            VisualEdit::AddNode { template, position } => {
                let mut node = self.instantiate(&template)?;
                node.position = position;
                EditOutcome::NodeCreated(graph.add_root(node)?)
            }
            VisualEdit::AddSubNode { parent, template, index } => {
                let node = self.instantiate(&template)?;
                EditOutcome::NodeCreated(graph.add_sub_node(parent, node, index)?)
            }
            VisualEdit::MoveSubNode { node, parent, index } => {
                if let Some(parent) = parent {
                    if let AttachResponse::Disallow(reason) = can_attach(graph, node, parent) {
                        return Err(GraphError::InvalidHierarchy(reason).into());
                    }
                }
                graph.move_sub_node(node, parent, index)?;
                EditOutcome::Updated
            }
            VisualEdit::RemoveNode { node } => EditOutcome::NodesRemoved(graph.remove_node(node)?),
            VisualEdit::Connect {
                from,
                to,
                priority,
                replace,
            } => {
                let edge = if replace {
                    graph.connect_replacing(from, to, priority)?
                } else {
                    graph.connect(from, to, priority)?
                };
                EditOutcome::Connected(edge)
            }
            VisualEdit::Disconnect { from, to } => EditOutcome::Disconnected(graph.disconnect(from, to)),
            VisualEdit::Rename { node, name } => {
                graph.rename_node(node, name)?;
                EditOutcome::Updated
            }
            VisualEdit::MoveNode { node, position } => {
                graph.set_position(node, position)?;
                EditOutcome::Updated
            }
            VisualEdit::SetProperty { node, name, value } => {
                graph.set_property(node, name, value)?;
                EditOutcome::Updated
            }
        };
        Ok(outcome)
    }
}

impl Default for EditorGraphAdapter {
    fn default() -> Self {
        Self::new(NodeRegistry::with_builtins())
    }
}
