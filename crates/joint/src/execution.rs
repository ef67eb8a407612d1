// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative execution of a Joint graph.
//!
//! An [`ExecutionEngine`] drives one cursor through a shared, read-only
//! [`JointGraph`]. Each [`ExecutionEngine::step`] performs a single
//! transition; the engine never blocks and never spawns work of its own.
//! Waiting for gameplay input is modelled as the `Suspended` state, left
//! again through [`ExecutionEngine::resume`].
//!
//! Sub-nodes run as nested calls: a node enters, calls its sub-nodes in
//! stored order, exits, and only then does routing pick the next node
//! along its flow edges.

use crate::blackboard::Blackboard;
use crate::edge::Edge;
use crate::graph::JointGraph;
use crate::node::{Node, NodeId, NodeKind};
use crate::port::PortValue;
use crate::tag::NodeTag;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Engine limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on transitions performed by one [`ExecutionEngine::run`]
    pub max_steps_per_run: usize,
    /// Revisits of one node without blackboard progress before a cycle is reported
    pub revisit_threshold: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: 10_000,
            revisit_threshold: 32,
        }
    }
}

/// Lifecycle of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Created, not started
    Idle,
    /// Ready to step
    Running,
    /// Waiting for a signal
    Suspended,
    /// Reached the end of the flow
    Completed,
    /// Stopped by the host or by a runtime error
    Aborted,
}

impl ExecutionState {
    /// Whether no further transitions can happen
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Where a frame is in its node's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePhase {
    /// Kind specific logic has not run yet
    Enter,
    /// Calling sub-nodes; holds the index of the next one
    Children(usize),
    /// Returning to the caller or routing
    Exit,
}

/// One call-stack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Node being executed
    pub node: NodeId,
    /// Progress through the node
    pub phase: FramePhase,
}

impl Frame {
    fn enter(node: NodeId) -> Self {
        Self {
            node,
            phase: FramePhase::Enter,
        }
    }
}

/// What a suspended cursor is waiting for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Wait {
    /// A signal whose tag matches the trigger
    Event(NodeTag),
    /// The condition node's requirement to hold
    Condition(NodeId),
}

/// External gameplay input delivered through [`ExecutionEngine::resume`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal tag
    pub tag: NodeTag,
    /// Variables written to the blackboard on delivery
    pub payload: IndexMap<String, PortValue>,
}

impl Signal {
    /// Create a signal without payload
    pub fn new(tag: impl Into<NodeTag>) -> Self {
        Self {
            tag: tag.into(),
            payload: IndexMap::new(),
        }
    }

    /// Add a payload variable
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PortValue>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }
}

/// Result of [`ExecutionEngine::resume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The wait was satisfied; the engine is Running again
    Resumed,
    /// The signal was recorded but the wait still holds
    StillWaiting,
}

/// Result of [`ExecutionEngine::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// State when the run stopped
    pub state: ExecutionState,
    /// Transitions performed
    pub steps: usize,
    /// The step budget ran out while still Running
    pub budget_exhausted: bool,
}

/// Notification sent to engine subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Execution started at `entry`
    Started {
        /// Entry node
        entry: NodeId,
    },
    /// A node began executing
    NodeBegin(NodeId),
    /// A node finished, sub-nodes included
    NodeEnd(NodeId),
    /// The cursor is waiting
    Suspended {
        /// Waiting node
        node: NodeId,
        /// What it waits for
        wait: Wait,
    },
    /// A wait was satisfied
    Resumed {
        /// Node that was waiting
        node: NodeId,
    },
    /// The flow ended
    Completed,
    /// Execution stopped; `reason` is set for runtime errors
    Aborted {
        /// Runtime error that caused the abort
        reason: Option<ExecutionError>,
    },
}

/// Error raised while executing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// A non-terminal action has nowhere to continue
    #[error("Action node {0} has no continuation")]
    NoContinuation(NodeId),

    /// A node was revisited too often without progress
    #[error("Cycle detected at node {node} after {visits} revisits without progress")]
    CycleDetected {
        /// Revisited node
        node: NodeId,
        /// Revisit count
        visits: u32,
    },

    /// Operation not allowed in the current state
    #[error("Operation '{operation}' is invalid in state {state:?}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current state
        state: ExecutionState,
    },

    /// Node referenced by the cursor is missing from the graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// No handler registered for an action
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// An action handler reported an error
    #[error("Action '{action}' failed on node {node}: {message}")]
    ActionFailed {
        /// Action name
        action: String,
        /// Executing node
        node: NodeId,
        /// Handler message
        message: String,
    },
}

/// Error returned by action handlers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    /// Create an action error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an action handler can see and change
pub struct ActionContext<'a> {
    /// Graph being executed
    pub graph: &'a JointGraph,
    /// Executing node
    pub node: &'a Node,
    /// Cursor variables
    pub blackboard: &'a mut Blackboard,
}

impl ActionContext<'_> {
    /// Read a node property
    pub fn property(&self, name: &str) -> Option<&PortValue> {
        self.node.properties.get(name)
    }

    /// Write a blackboard variable
    pub fn set_variable(&mut self, name: impl Into<String>, value: PortValue) -> bool {
        self.blackboard.set(name, value)
    }

    /// Read a blackboard variable
    pub fn variable(&self, name: &str) -> Option<&PortValue> {
        self.blackboard.get(name)
    }
}

/// Host provided behavior of action nodes
pub trait ActionHandler: Send + Sync {
    /// Run the action
    fn run(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&mut ActionContext<'_>) -> Result<(), ActionError> + Send + Sync,
{
    fn run(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self(ctx)
    }
}

/// Copies every node property onto the blackboard
#[derive(Debug, Clone, Copy, Default)]
pub struct SetVariables;

impl ActionHandler for SetVariables {
    fn run(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        for (name, value) in &ctx.node.properties {
            ctx.blackboard.set(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl ActionHandler for Noop {
    fn run(&self, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Action handlers by name
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: IndexMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `set_variables` and `noop`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("set_variables", SetVariables);
        registry.register("noop", Noop);
        registry
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// Revisit bookkeeping for cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Visit {
    epoch: u64,
    count: u32,
}

/// Serializable position of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCursor {
    /// Node execution started at
    pub entry: Option<NodeId>,
    /// Call-stack, innermost last
    pub stack: Vec<Frame>,
    /// Cursor variables and received tags
    pub blackboard: Blackboard,
    /// Pending wait while suspended
    pub wait: Option<Wait>,
    visits: IndexMap<NodeId, Visit>,
}

impl ExecutionCursor {
    fn new() -> Self {
        Self {
            entry: None,
            stack: Vec::new(),
            blackboard: Blackboard::new(),
            wait: None,
            visits: IndexMap::new(),
        }
    }

    /// Innermost frame
    pub fn current(&self) -> Option<&Frame> {
        self.stack.last()
    }
}

/// Saved engine state, see [`ExecutionEngine::snapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// State at snapshot time
    pub state: ExecutionState,
    /// Cursor at snapshot time
    pub cursor: ExecutionCursor,
}

type Subscriber = Box<dyn FnMut(&ExecutionEvent) + Send>;

/// Executes one cursor through a shared graph
pub struct ExecutionEngine {
    graph: Arc<JointGraph>,
    config: ExecutionConfig,
    actions: ActionRegistry,
    state: ExecutionState,
    cursor: ExecutionCursor,
    subscribers: Vec<Subscriber>,
}

impl ExecutionEngine {
    /// Create an idle engine with the built-in actions
    pub fn new(graph: Arc<JointGraph>, config: ExecutionConfig) -> Self {
        Self {
            graph,
            config,
            actions: ActionRegistry::with_builtins(),
            state: ExecutionState::Idle,
            cursor: ExecutionCursor::new(),
            subscribers: Vec::new(),
        }
    }

    /// Replace the action registry
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Register one action handler
    pub fn register_action(&mut self, name: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.actions.register(name, handler);
    }

    /// Receive every [`ExecutionEvent`] from now on
    pub fn subscribe(&mut self, subscriber: Box<dyn FnMut(&ExecutionEvent) + Send>) {
        self.subscribers.push(subscriber);
    }

    /// Current state
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Current cursor
    pub fn cursor(&self) -> &ExecutionCursor {
        &self.cursor
    }

    /// Cursor variables
    pub fn blackboard(&self) -> &Blackboard {
        &self.cursor.blackboard
    }

    /// Pending wait while suspended
    pub fn pending_wait(&self) -> Option<&Wait> {
        self.cursor.wait.as_ref()
    }

    /// The graph being executed
    pub fn graph(&self) -> &Arc<JointGraph> {
        &self.graph
    }

    /// Configuration
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn emit(&mut self, event: ExecutionEvent) {
        for subscriber in &mut self.subscribers {
            subscriber(&event);
        }
    }

    fn invalid(&self, operation: &'static str) -> ExecutionError {
        ExecutionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn node(&self, node_id: NodeId) -> Result<&Node, ExecutionError> {
        self.graph.node(node_id).ok_or(ExecutionError::NodeNotFound(node_id))
    }

    /// Begin execution at `entry`.
    ///
    /// When `entry` is a sub-node, its owners are placed on the call-stack so
    /// that their remaining sub-nodes run after the entry's branch.
    pub fn start(&mut self, entry: NodeId) -> Result<(), ExecutionError> {
        if self.state != ExecutionState::Idle {
            return Err(self.invalid("start"));
        }
        self.node(entry)?;

        let mut path = self.graph.ancestors(entry);
        path.reverse();
        path.push(entry);

        let mut stack = Vec::with_capacity(path.len());
        for pair in path.windows(2) {
            let (owner, child) = (pair[0], pair[1]);
            let index = self
                .graph
                .sub_nodes(owner)
                .iter()
                .position(|id| *id == child)
                .ok_or(ExecutionError::NodeNotFound(child))?;
            stack.push(Frame {
                node: owner,
                phase: FramePhase::Children(index + 1),
            });
        }
        stack.push(Frame::enter(entry));

        self.cursor = ExecutionCursor::new();
        self.cursor.entry = Some(entry);
        self.cursor.stack = stack;
        self.cursor.visits.insert(
            entry,
            Visit {
                epoch: self.cursor.blackboard.epoch(),
                count: 0,
            },
        );
        self.state = ExecutionState::Running;
        tracing::debug!(entry = %entry, graph = %self.graph.name, "Execution started");
        self.emit(ExecutionEvent::Started { entry });

        let owners: Vec<NodeId> = path[..path.len() - 1].to_vec();
        for owner in owners {
            self.emit(ExecutionEvent::NodeBegin(owner));
        }
        Ok(())
    }

    /// Perform one transition.
    ///
    /// Runtime errors abort this engine, notify subscribers and are returned.
    pub fn step(&mut self) -> Result<ExecutionState, ExecutionError> {
        if self.state != ExecutionState::Running {
            return Err(self.invalid("step"));
        }
        match self.transition() {
            Ok(()) => Ok(self.state),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Step until the engine leaves Running or the step budget runs out
    pub fn run(&mut self) -> Result<RunReport, ExecutionError> {
        if self.state != ExecutionState::Running {
            return Err(self.invalid("run"));
        }
        let mut steps = 0;
        while self.state == ExecutionState::Running && steps < self.config.max_steps_per_run {
            self.step()?;
            steps += 1;
        }
        let budget_exhausted = self.state == ExecutionState::Running;
        if budget_exhausted {
            tracing::warn!(steps, "Step budget exhausted");
        }
        Ok(RunReport {
            state: self.state,
            steps,
            budget_exhausted,
        })
    }

    /// Deliver a signal to a suspended engine.
    ///
    /// The payload and tag are recorded even when the wait is not satisfied.
    pub fn resume(&mut self, signal: Signal) -> Result<ResumeOutcome, ExecutionError> {
        if self.state != ExecutionState::Suspended {
            return Err(self.invalid("resume"));
        }
        let Some(frame) = self.cursor.stack.last().copied() else {
            return Err(self.fail(self.invalid("resume")));
        };

        for (name, value) in &signal.payload {
            self.cursor.blackboard.set(name.clone(), value.clone());
        }
        self.cursor.blackboard.add_tag(signal.tag.clone());

        let satisfied = match self.wait_satisfied(&signal) {
            Ok(satisfied) => satisfied,
            Err(err) => return Err(self.fail(err)),
        };

        if !satisfied {
            tracing::debug!(tag = %signal.tag, node = %frame.node, "Signal did not satisfy wait");
            return Ok(ResumeOutcome::StillWaiting);
        }

        // A satisfied wait is progress: only revisits with no suspension in
        // between count towards a cycle
        self.cursor.wait = None;
        self.cursor.visits.clear();
        if let Some(top) = self.cursor.stack.last_mut() {
            top.phase = FramePhase::Children(0);
        }
        self.state = ExecutionState::Running;
        self.emit(ExecutionEvent::Resumed { node: frame.node });
        Ok(ResumeOutcome::Resumed)
    }

    fn wait_satisfied(&self, signal: &Signal) -> Result<bool, ExecutionError> {
        Ok(match &self.cursor.wait {
            Some(Wait::Event(trigger)) => signal.tag.matches(trigger, false),
            Some(Wait::Condition(node_id)) => match &self.node(*node_id)?.kind {
                NodeKind::Condition { requirement } => requirement.evaluate(&self.cursor.blackboard),
                _ => true,
            },
            None => true,
        })
    }

    /// Stop execution. Returns `false` when already finished.
    pub fn abort(&mut self) -> bool {
        if self.state.is_finished() {
            return false;
        }
        self.state = ExecutionState::Aborted;
        self.cursor.stack.clear();
        self.cursor.wait = None;
        tracing::debug!("Execution aborted");
        self.emit(ExecutionEvent::Aborted { reason: None });
        true
    }

    fn fail(&mut self, err: ExecutionError) -> ExecutionError {
        tracing::warn!(error = %err, "Execution failed");
        self.state = ExecutionState::Aborted;
        self.cursor.stack.clear();
        self.cursor.wait = None;
        self.emit(ExecutionEvent::Aborted {
            reason: Some(err.clone()),
        });
        err
    }

    /// Save the cursor so execution can continue later
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            state: self.state,
            cursor: self.cursor.clone(),
        }
    }

    /// Rebuild an engine from a snapshot taken over the same graph
    pub fn restore(
        graph: Arc<JointGraph>,
        config: ExecutionConfig,
        snapshot: ExecutionSnapshot,
    ) -> Result<Self, ExecutionError> {
        if let Some(missing) = snapshot
            .cursor
            .stack
            .iter()
            .map(|frame| frame.node)
            .find(|id| !graph.contains(*id))
        {
            return Err(ExecutionError::NodeNotFound(missing));
        }
        let mut engine = Self::new(graph, config);
        engine.state = snapshot.state;
        engine.cursor = snapshot.cursor;
        Ok(engine)
    }

    fn transition(&mut self) -> Result<(), ExecutionError> {
        let Some(frame) = self.cursor.stack.last().copied() else {
            self.complete();
            return Ok(());
        };
        match frame.phase {
            FramePhase::Enter => self.enter(frame.node),
            FramePhase::Children(index) => {
                let next = self.node(frame.node)?.sub_nodes.get(index).copied();
                let top = self.top_mut()?;
                match next {
                    Some(child) => {
                        top.phase = FramePhase::Children(index + 1);
                        self.cursor.stack.push(Frame::enter(child));
                    }
                    None => top.phase = FramePhase::Exit,
                }
                Ok(())
            }
            FramePhase::Exit => {
                self.cursor.stack.pop();
                self.emit(ExecutionEvent::NodeEnd(frame.node));
                if self.cursor.stack.is_empty() {
                    self.route(frame.node)?;
                }
                Ok(())
            }
        }
    }

    fn top_mut(&mut self) -> Result<&mut Frame, ExecutionError> {
        let state = self.state;
        self.cursor.stack.last_mut().ok_or(ExecutionError::InvalidState {
            operation: "step",
            state,
        })
    }

    fn enter(&mut self, node_id: NodeId) -> Result<(), ExecutionError> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(node_id).ok_or(ExecutionError::NodeNotFound(node_id))?;
        self.emit(ExecutionEvent::NodeBegin(node_id));

        match &node.kind {
            NodeKind::Event { trigger } => {
                self.suspend(node_id, Wait::Event(trigger.clone()));
                return Ok(());
            }
            NodeKind::Condition { requirement } => {
                if !requirement.evaluate(&self.cursor.blackboard) {
                    self.suspend(node_id, Wait::Condition(node_id));
                    return Ok(());
                }
            }
            NodeKind::Action { action, .. } => {
                let handler = self
                    .actions
                    .get(action)
                    .ok_or_else(|| ExecutionError::UnknownAction(action.clone()))?;
                let mut ctx = ActionContext {
                    graph: graph.as_ref(),
                    node,
                    blackboard: &mut self.cursor.blackboard,
                };
                handler.run(&mut ctx).map_err(|err| ExecutionError::ActionFailed {
                    action: action.clone(),
                    node: node_id,
                    message: err.0,
                })?;
                tracing::debug!(node = %node_id, action = %action, "Action ran");
            }
            NodeKind::Fragment | NodeKind::Terminal => {}
        }

        self.top_mut()?.phase = FramePhase::Children(0);
        Ok(())
    }

    fn suspend(&mut self, node_id: NodeId, wait: Wait) {
        self.cursor.wait = Some(wait.clone());
        self.state = ExecutionState::Suspended;
        tracing::debug!(node = %node_id, ?wait, "Execution suspended");
        self.emit(ExecutionEvent::Suspended { node: node_id, wait });
    }

    fn complete(&mut self) {
        self.state = ExecutionState::Completed;
        tracing::info!(graph = %self.graph.name, "Execution completed");
        self.emit(ExecutionEvent::Completed);
    }

    /// Pick the continuation edge of `node_id`, falling back to its
    /// sub-nodes in pre-order.
    fn continuation(&self, node_id: NodeId) -> Option<&Edge> {
        std::iter::once(node_id)
            .chain(self.graph.descendants(node_id))
            .find_map(|candidate| best_flow_edge(&self.graph, candidate))
    }

    fn route(&mut self, node_id: NodeId) -> Result<(), ExecutionError> {
        let target = self.continuation(node_id).map(|edge| edge.to.node);
        let Some(target) = target else {
            let node = self.node(node_id)?;
            if matches!(node.kind, NodeKind::Action { .. }) && !node.kind.is_terminal() {
                return Err(ExecutionError::NoContinuation(node_id));
            }
            self.complete();
            return Ok(());
        };

        self.node(target)?;
        let epoch = self.cursor.blackboard.epoch();
        let visits = match self.cursor.visits.get_mut(&target) {
            Some(visit) if visit.epoch == epoch => {
                visit.count += 1;
                visit.count
            }
            Some(visit) => {
                *visit = Visit { epoch, count: 0 };
                0
            }
            None => {
                self.cursor.visits.insert(target, Visit { epoch, count: 0 });
                0
            }
        };
        if visits > self.config.revisit_threshold {
            return Err(ExecutionError::CycleDetected { node: target, visits });
        }

        tracing::trace!(from = %node_id, to = %target, "Routing");
        self.cursor.stack.push(Frame::enter(target));
        Ok(())
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("graph", &self.graph.name)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Highest priority edge leaving one of the node's flow outputs.
/// Ties go to the earliest inserted edge.
fn best_flow_edge(graph: &JointGraph, node_id: NodeId) -> Option<&Edge> {
    let node = graph.node(node_id)?;
    graph
        .outgoing_edges(node_id)
        .filter(|edge| node.port(&edge.from.port).is_some_and(|p| p.is_flow_output()))
        .fold(None, |best: Option<&Edge>, edge| match best {
            Some(current) if current.priority >= edge.priority => Some(current),
            _ => Some(edge),
        })
}
