// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history of graph edits.
//!
//! Every edit stores a bincode snapshot of the graph before and after the
//! change. Snapshots are whole graphs; Joint assets are small enough that
//! diffing is not worth it.

use joint::JointGraph;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default undo history depth
pub const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Unique edit ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditId(u64);

impl EditId {
    /// Get the raw ID value
    pub fn value(&self) -> u64 {
        self.0
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serialized graph state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Bincode encoded graph
    pub data: Vec<u8>,
    /// Timestamp when snapshot was taken
    pub timestamp: u64,
}

impl GraphSnapshot {
    /// Capture a graph
    pub fn capture(graph: &JointGraph) -> Result<Self> {
        Ok(Self {
            data: bincode::serialize(graph)?,
            timestamp: now_secs(),
        })
    }

    /// Rebuild the captured graph
    pub fn restore(&self) -> Result<JointGraph> {
        Ok(bincode::deserialize(&self.data)?)
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// One undoable edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edit {
    /// Unique edit ID
    pub id: EditId,
    /// Human-readable description
    pub description: String,
    /// Graph before the edit (for undo)
    pub before: GraphSnapshot,
    /// Graph after the edit (for redo)
    pub after: GraphSnapshot,
}

impl Edit {
    /// Get memory size of this edit
    pub fn memory_size(&self) -> usize {
        self.before.size() + self.after.size()
    }
}

/// History statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Edits in the undo stack
    pub undo_count: usize,
    /// Edits in the redo stack
    pub redo_count: usize,
    /// Total memory used by the undo stack (bytes)
    pub memory_used: usize,
    /// Maximum history depth
    pub max_depth: usize,
}

/// Undo/redo history manager
#[derive(Debug)]
pub struct History {
    undo_stack: VecDeque<Edit>,
    redo_stack: VecDeque<Edit>,
    next_id: u64,
    max_depth: usize,
    memory_used: usize,
}

impl History {
    /// Create a new history manager
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            next_id: 1,
            max_depth: max_depth.max(1),
            memory_used: 0,
        }
    }

    /// Record a finished edit. Clears the redo stack.
    pub fn record(&mut self, description: impl Into<String>, before: GraphSnapshot, after: GraphSnapshot) -> EditId {
        let id = EditId(self.next_id);
        self.next_id += 1;
        let edit = Edit {
            id,
            description: description.into(),
            before,
            after,
        };

        self.redo_stack.clear();
        self.memory_used += edit.memory_size();
        self.undo_stack.push_back(edit);

        // Enforce history limit
        while self.undo_stack.len() > self.max_depth {
            if let Some(old) = self.undo_stack.pop_front() {
                self.memory_used = self.memory_used.saturating_sub(old.memory_size());
            }
        }
        id
    }

    /// Undo the last edit, returning it
    pub fn undo(&mut self) -> Result<Edit> {
        let edit = self.undo_stack.pop_back().ok_or(HistoryError::NothingToUndo)?;
        self.memory_used = self.memory_used.saturating_sub(edit.memory_size());
        self.redo_stack.push_back(edit.clone());
        Ok(edit)
    }

    /// Redo the last undone edit, returning it
    pub fn redo(&mut self) -> Result<Edit> {
        let edit = self.redo_stack.pop_back().ok_or(HistoryError::NothingToRedo)?;
        self.memory_used += edit.memory_size();
        self.undo_stack.push_back(edit.clone());
        Ok(edit)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.memory_used = 0;
    }

    /// Get history statistics
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
            memory_used: self.memory_used,
            max_depth: self.max_depth,
        }
    }

    /// Get description of next undo edit
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|e| e.description.as_str())
    }

    /// Get description of next redo edit
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|e| e.description.as_str())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
