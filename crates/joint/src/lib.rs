// SPDX-License-Identifier: MIT OR Apache-2.0
//! Joint node graph runtime.
//!
//! Joint graphs describe gameplay flow (dialogue, quests, cutscenes) as
//! nodes that own ordered sub-nodes and are wired together by flow edges.
//!
//! ## Architecture
//!
//! - [`graph::JointGraph`] owns every node in an id keyed arena, keeps the
//!   ownership tree and the edge set apart, and validates both
//! - [`execution::ExecutionEngine`] walks a shared `Arc<JointGraph>` as a
//!   cooperative state machine, suspending on events and conditions
//! - [`search::SearchIndex`] ranks nodes by name, tag and category
//! - [`asset`] persists graphs as RON or JSON with validation on load

pub mod tag;
pub mod port;
pub mod node;
pub mod blackboard;
pub mod edge;
pub mod graph;
pub mod search;
pub mod execution;
pub mod asset;
pub mod settings;

pub use tag::NodeTag;
pub use port::{Port, PortDirection, PortId, PortType, PortValue};
pub use node::{Node, NodeId, NodeKind, NodeRegistry, NodeTemplate, Requirement};
pub use blackboard::Blackboard;
pub use edge::{Edge, EdgeId, PortRef};
pub use graph::{GraphError, JointGraph, ObserverId, StructuralChange, Violation};
pub use search::{KeyKind, MatchRank, MatchRanker, SearchConfig, SearchHit, SearchIndex, SharedSearchIndex, TieredRanker};
pub use execution::{
    ActionContext, ActionError, ActionHandler, ActionRegistry, ExecutionConfig, ExecutionEngine, ExecutionError,
    ExecutionEvent, ExecutionSnapshot, ExecutionState, ResumeOutcome, RunReport, Signal, Wait,
};
pub use asset::{AssetError, AssetFormat, AssetRef, AssetStore, FileAssetStore, JointAsset, MemoryAssetStore};
pub use settings::{JointSettings, SettingsError};
