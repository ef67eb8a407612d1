// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor side of Joint.
//!
//! This crate provides the pieces an editor front end builds on:
//! - Visual graph adapter turning gestures into graph mutations
//! - Documents with undo/redo and save/reload
//! - Outliner search tree with natural sorting
//! - Asset watching for reload on external changes

pub mod adapter;
pub mod document;
pub mod history;
pub mod search_tree;
pub mod settings;
pub mod watcher;

pub use adapter::{
    can_attach, can_connect, AdapterError, AttachResponse, ConnectResponse, EditOutcome, EditorGraphAdapter,
    VisualConnection, VisualEdit, VisualGraph, VisualNode, VisualPin,
};
pub use document::{DocumentError, JointDocument};
pub use history::{History, HistoryError};
pub use search_tree::{FilterResult, SearchTree, SearchTreeFilter, SearchTreeItem};
pub use settings::EditorSettings;
pub use watcher::{AssetEvent, AssetWatcher, WatcherConfig};
