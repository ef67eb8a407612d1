// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A node is the amalgam of an executable step and a data store. Nodes own an
//! ordered list of sub-nodes (fragments); the owning relation itself lives in
//! the graph arena, the node only records its parent and child ids.

use crate::blackboard::Blackboard;
use crate::port::{Port, PortDirection, PortId, PortType, PortValue};
use crate::tag::NodeTag;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of the flow input every non-root-only node carries
pub const FLOW_IN: &str = "In";
/// Name of the default flow output
pub const FLOW_OUT: &str = "Out";
/// Name of the designated continuation output of action nodes
pub const FLOW_CONTINUE: &str = "Continue";

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Predicate evaluated by condition nodes against the execution blackboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Requirement {
    /// Always satisfied
    Always,
    /// The variable exists and is truthy
    VariableTrue(String),
    /// The variable exists and equals the value
    VariableEquals(String, PortValue),
    /// A signal carrying a matching tag has been received
    TagPresent {
        /// Tag to look for
        tag: NodeTag,
        /// Require an exact match instead of a hierarchical one
        exact: bool,
    },
    /// Negation
    Not(Box<Requirement>),
    /// Every requirement must hold
    All(Vec<Requirement>),
    /// At least one requirement must hold
    Any(Vec<Requirement>),
}

impl Requirement {
    /// Evaluate against the blackboard
    pub fn evaluate(&self, blackboard: &Blackboard) -> bool {
        match self {
            Self::Always => true,
            Self::VariableTrue(name) => blackboard.get(name).is_some_and(PortValue::is_truthy),
            Self::VariableEquals(name, expected) => blackboard.get(name) == Some(expected),
            Self::TagPresent { tag, exact } => blackboard.has_tag(tag, *exact),
            Self::Not(inner) => !inner.evaluate(blackboard),
            Self::All(all) => all.iter().all(|r| r.evaluate(blackboard)),
            Self::Any(any) => any.iter().any(|r| r.evaluate(blackboard)),
        }
    }
}

/// Node kind with its kind specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Waits for an external signal matching `trigger`
    Event {
        /// Signal tag that releases the node (hierarchical match)
        trigger: NodeTag,
    },
    /// Gates the flow on a requirement, waiting for signals while unmet
    Condition {
        /// Requirement to satisfy
        requirement: Requirement,
    },
    /// Runs a host registered action and continues
    Action {
        /// Action handler name
        action: String,
        /// Whether the flow may end here without a continuation edge
        terminal: bool,
    },
    /// Container whose sub-nodes run in stored order
    Fragment,
    /// Ends the flow
    Terminal,
}

impl NodeKind {
    /// Short label, also used as the default search category
    pub fn label(&self) -> &'static str {
        match self {
            Self::Event { .. } => "Event",
            Self::Condition { .. } => "Condition",
            Self::Action { .. } => "Action",
            Self::Fragment => "Fragment",
            Self::Terminal => "Terminal",
        }
    }

    /// Ports created for a fresh node of this kind
    pub fn default_ports(&self) -> Vec<Port> {
        let input = Port::input(FLOW_IN, PortType::Flow);
        match self {
            // Events and actions route along a single edge
            Self::Event { .. } => vec![input, Port::output(FLOW_OUT, PortType::Flow).exclusive(true)],
            Self::Action { .. } => vec![
                input,
                Port::output(FLOW_CONTINUE, PortType::Flow).exclusive(true),
            ],
            Self::Condition { .. } | Self::Fragment => {
                vec![input, Port::output(FLOW_OUT, PortType::Flow)]
            }
            Self::Terminal => vec![input],
        }
    }

    /// Whether the flow may legitimately end at this kind
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Terminal => true,
            Self::Action { terminal, .. } => *terminal,
            Self::Event { .. } | Self::Condition { .. } | Self::Fragment => false,
        }
    }
}

/// A node instance in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Display name, also the primary search key
    pub name: String,
    /// Search category
    pub category: String,
    /// Kind and kind payload
    pub kind: NodeKind,
    /// Tags used for lookup and fragment queries
    pub tags: Vec<NodeTag>,
    /// Named typed properties
    pub properties: IndexMap<String, PortValue>,
    /// Ordered ports
    pub ports: Vec<Port>,
    /// Owning parent, `None` for roots and detached nodes
    pub parent: Option<NodeId>,
    /// Owned children in execution order
    pub sub_nodes: Vec<NodeId>,
    /// Position in the graph editor
    pub position: [f32; 2],
    /// Whether the node is collapsed in the editor
    pub collapsed: bool,
}

impl Node {
    /// Create a new node of the given kind with its default ports
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            category: kind.label().to_string(),
            ports: kind.default_ports(),
            kind,
            tags: Vec::new(),
            properties: IndexMap::new(),
            parent: None,
            sub_nodes: Vec::new(),
            position: [0.0, 0.0],
            collapsed: false,
        }
    }

    /// Event node released by signals matching `trigger`
    pub fn event(name: impl Into<String>, trigger: impl Into<NodeTag>) -> Self {
        Self::new(NodeKind::Event { trigger: trigger.into() }, name)
    }

    /// Condition node gated on `requirement`
    pub fn condition(name: impl Into<String>, requirement: Requirement) -> Self {
        Self::new(NodeKind::Condition { requirement }, name)
    }

    /// Action node running the handler registered as `action`
    pub fn action(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(
            NodeKind::Action {
                action: action.into(),
                terminal: false,
            },
            name,
        )
    }

    /// Fragment node
    pub fn fragment(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Fragment, name)
    }

    /// Terminal node
    pub fn terminal(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Terminal, name)
    }

    /// Mark an action as allowed to end the flow
    pub fn as_terminal(mut self) -> Self {
        if let NodeKind::Action { terminal, .. } = &mut self.kind {
            *terminal = true;
        }
        self
    }

    /// Add a port
    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// Add a property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PortValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<NodeTag>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Override the search category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Get a port by ID
    pub fn port(&self, port_id: &PortId) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == *port_id)
    }

    pub(crate) fn port_mut(&mut self, port_id: &PortId) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.id == *port_id)
    }

    /// Get the first port with the given name and direction
    pub fn port_named(&self, name: &str, direction: PortDirection) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.direction == direction && p.name == name)
    }

    /// Input ports in order
    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Input)
    }

    /// Output ports in order
    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Output)
    }

    /// The flow input, if the node has one
    pub fn flow_input(&self) -> Option<&Port> {
        self.inputs().find(|p| p.port_type.is_flow())
    }

    /// The designated continuation output (first flow output)
    pub fn continue_port(&self) -> Option<&Port> {
        self.ports.iter().find(|p| p.is_flow_output())
    }

    /// Whether the node carries a tag matching `tag`
    pub fn has_tag(&self, tag: &NodeTag, exact: bool) -> bool {
        self.tags.iter().any(|own| own.matches(tag, exact))
    }

    /// Whether this node is owned by another node
    pub fn is_sub_node(&self) -> bool {
        self.parent.is_some()
    }
}

/// Template a node can be created from (palette entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Unique template identifier
    pub id: String,
    /// Display name of created nodes
    pub name: String,
    /// Category
    pub category: String,
    /// Description
    pub description: String,
    /// Kind of created nodes
    pub kind: NodeKind,
    /// Ports added after the kind's default ports
    pub extra_ports: Vec<Port>,
    /// Initial properties
    pub properties: IndexMap<String, PortValue>,
}

impl NodeTemplate {
    /// Create a template with no extra ports or properties
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: kind.label().to_string(),
            description: String::new(),
            kind,
            extra_ports: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Instantiate a node; ports get fresh ids on every instantiation
    pub fn instantiate(&self) -> Node {
        let mut node = Node::new(self.kind.clone(), self.name.clone()).with_category(self.category.clone());
        for port in &self.extra_ports {
            let mut port = port.clone();
            port.id = PortId::new();
            node.ports.push(port);
        }
        node.properties = self.properties.clone();
        node
    }
}

/// Registry of available node templates
pub struct NodeRegistry {
    /// Registered templates by ID
    templates: IndexMap<String, NodeTemplate>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            templates: IndexMap::new(),
        }
    }

    /// Registry with one template per node kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            NodeTemplate::new("event", "Event", NodeKind::Event { trigger: NodeTag::new("Event") })
                .with_description("Waits for a gameplay signal"),
        );
        registry.register(
            NodeTemplate::new(
                "condition",
                "Condition",
                NodeKind::Condition {
                    requirement: Requirement::Always,
                },
            )
            .with_description("Continues once its requirement holds"),
        );
        registry.register(
            NodeTemplate::new(
                "action",
                "Action",
                NodeKind::Action {
                    action: "set_variables".to_string(),
                    terminal: false,
                },
            )
            .with_description("Runs an action and continues"),
        );
        registry.register(
            NodeTemplate::new("fragment", "Fragment", NodeKind::Fragment)
                .with_description("Runs its sub-nodes in order"),
        );
        registry.register(
            NodeTemplate::new("terminal", "End", NodeKind::Terminal).with_description("Ends the flow"),
        );
        registry
    }

    /// Register a template
    pub fn register(&mut self, template: NodeTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Get a template by ID
    pub fn get(&self, id: &str) -> Option<&NodeTemplate> {
        self.templates.get(id)
    }

    /// Get all registered templates
    pub fn templates(&self) -> impl Iterator<Item = &NodeTemplate> {
        self.templates.values()
    }

    /// Get templates by category
    pub fn templates_in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a NodeTemplate> {
        self.templates.values().filter(move |t| t.category == category)
    }

    /// Create a node from a template ID
    pub fn create_node(&self, template_id: &str) -> Option<Node> {
        self.get(template_id).map(NodeTemplate::instantiate)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
