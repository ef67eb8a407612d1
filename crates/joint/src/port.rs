// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.

use crate::node::NodeId;
use crate::tag::NodeTag;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Execution flow between nodes
    Flow,
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// Text value
    String,
    /// Hierarchical tag
    Tag,
    /// Reference to another node in the same graph
    NodeRef,
    /// Any data type (for generic nodes)
    Any,
    /// Custom type
    Custom(String),
}

impl PortType {
    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PortType) -> bool {
        // Flow only ever connects to flow
        if matches!(self, Self::Flow) || matches!(other, Self::Flow) {
            return self == other;
        }

        // Any data type can connect to anything else that carries data
        if matches!(self, Self::Any) || matches!(other, Self::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        // Implicit numeric conversions
        matches!((self, other), (Self::Int, Self::Float) | (Self::Float, Self::Int))
    }

    /// Whether a port of this type can store `value`
    pub fn accepts(&self, value: &PortValue) -> bool {
        !matches!(self, Self::Flow) && value.port_type().can_connect_to(self)
    }

    /// Whether this is an execution flow type
    pub fn is_flow(&self) -> bool {
        matches!(self, Self::Flow)
    }
}

/// A port on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Unique port ID
    pub id: PortId,
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub port_type: PortType,
    /// Whether the port accepts at most one edge
    pub exclusive: bool,
    /// Current value (data ports only)
    pub value: Option<PortValue>,
}

impl Port {
    /// Create a new port
    pub fn new(name: impl Into<String>, port_type: PortType, direction: PortDirection) -> Self {
        // Inputs merge and outputs fan out unless marked exclusive
        Self {
            id: PortId::new(),
            name: name.into(),
            direction,
            port_type,
            exclusive: false,
            value: None,
        }
    }

    /// Create a new input port
    pub fn input(name: impl Into<String>, port_type: PortType) -> Self {
        Self::new(name, port_type, PortDirection::Input)
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, port_type: PortType) -> Self {
        Self::new(name, port_type, PortDirection::Output)
    }

    /// Set the exclusivity rule
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Set the initial value
    pub fn with_value(mut self, value: PortValue) -> Self {
        self.value = Some(value);
        self
    }

    /// Check if a connection to another port is valid
    pub fn can_connect(&self, other: &Port) -> bool {
        // Must be opposite directions
        if self.direction == other.direction {
            return false;
        }

        self.port_type.can_connect_to(&other.port_type)
    }

    /// Whether this is an output flow port
    pub fn is_flow_output(&self) -> bool {
        self.direction == PortDirection::Output && self.port_type.is_flow()
    }
}

/// Value that can be stored in a port or node property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text
    String(String),
    /// Hierarchical tag
    Tag(NodeTag),
    /// Node reference
    NodeRef(NodeId),
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::String(_) => PortType::String,
            Self::Tag(_) => PortType::Tag,
            Self::NodeRef(_) => PortType::NodeRef,
        }
    }

    /// Convert this value for storage in a port of type `target`
    pub fn coerce_to(self, target: &PortType) -> Option<PortValue> {
        match (self, target) {
            (Self::Int(v), PortType::Float) => Some(Self::Float(v as f64)),
            (Self::Float(v), PortType::Int) => Some(Self::Int(v as i64)),
            (value, target) if target.accepts(&value) => Some(value),
            _ => None,
        }
    }

    /// Truthiness used by conditions
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Tag(t) => !t.is_empty(),
            Self::NodeRef(_) => true,
        }
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PortValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PortValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<NodeTag> for PortValue {
    fn from(value: NodeTag) -> Self {
        Self::Tag(value)
    }
}
