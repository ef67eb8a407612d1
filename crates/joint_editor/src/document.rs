// SPDX-License-Identifier: MIT OR Apache-2.0
//! An open graph asset in the editor.
//!
//! The document owns the graph behind an `Arc` so play sessions can share it.
//! Edits need exclusive access: while any [`ExecutionEngine`] still holds the
//! graph, every mutation fails with [`DocumentError::GraphInUse`].

use crate::adapter::{AdapterError, EditOutcome, EditorGraphAdapter, VisualEdit};
use crate::history::{GraphSnapshot, History, HistoryError, HistoryStats};
use crate::settings::EditorSettings;
use joint::{
    AssetError, AssetRef, AssetStore, ExecutionConfig, ExecutionEngine, ExecutionError, GraphError, JointGraph, NodeId,
    SearchConfig, SharedSearchIndex,
};
use std::sync::Arc;
use thiserror::Error;

/// Document errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A play session still holds the graph
    #[error("Graph is in use by a running execution")]
    GraphInUse,

    /// The graph rejected the edit
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Undo/redo failure
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Load or save failure
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// The adapter rejected the edit
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The document was never saved
    #[error("Document has no asset path")]
    NoAsset,
}

/// Result type for document operations
pub type Result<T> = std::result::Result<T, DocumentError>;

/// A graph being edited
pub struct JointDocument {
    asset: Option<AssetRef>,
    graph: Arc<JointGraph>,
    history: History,
    search: Arc<SharedSearchIndex>,
}

impl JointDocument {
    /// Create an unsaved document around `graph`
    pub fn new(graph: JointGraph) -> Self {
        let search = Arc::new(SharedSearchIndex::new(SearchConfig::default()));
        search.rebuild(&graph);
        Self {
            asset: None,
            graph: Arc::new(graph),
            history: History::new(),
            search,
        }
    }

    /// Open an asset from a store
    pub fn open(store: &dyn AssetStore, asset: AssetRef) -> Result<Self> {
        let graph = store.load(&asset)?;
        let mut document = Self::new(graph);
        document.asset = Some(asset);
        Ok(document)
    }

    /// Use a different undo depth. Clears the history.
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history = History::with_max_depth(depth);
        self
    }

    /// Apply the undo depth and search configuration from editor settings
    pub fn with_settings(self, settings: &EditorSettings) -> Self {
        self.with_history_depth(settings.history_depth)
            .with_search_config(settings.runtime.search.clone())
    }

    /// Use a different search configuration
    pub fn with_search_config(mut self, config: SearchConfig) -> Self {
        self.search = Arc::new(SharedSearchIndex::new(config));
        self.search.rebuild(&self.graph);
        self
    }

    /// Asset this document was loaded from or saved to
    pub fn asset(&self) -> Option<&AssetRef> {
        self.asset.as_ref()
    }

    /// The graph
    pub fn graph(&self) -> &JointGraph {
        &self.graph
    }

    /// A shared handle to the graph. Edits fail while it is alive.
    pub fn share(&self) -> Arc<JointGraph> {
        Arc::clone(&self.graph)
    }

    /// Search index kept in sync with the graph
    pub fn search(&self) -> &Arc<SharedSearchIndex> {
        &self.search
    }

    /// Whether the graph changed since it was loaded or saved
    pub fn is_dirty(&self) -> bool {
        self.graph.is_dirty()
    }

    /// Undo/redo state
    pub fn history(&self) -> HistoryStats {
        self.history.stats()
    }

    /// Label of the edit `undo` would revert
    pub fn undo_description(&self) -> Option<&str> {
        self.history.undo_description()
    }

    /// Label of the edit `redo` would reapply
    pub fn redo_description(&self) -> Option<&str> {
        self.history.redo_description()
    }

    fn graph_mut(&mut self) -> Result<&mut JointGraph> {
        Arc::get_mut(&mut self.graph).ok_or(DocumentError::GraphInUse)
    }

    /// Run `change` against the graph as one undoable edit.
    ///
    /// On error the graph is rolled back to its state before the call and
    /// nothing is recorded. Edits that leave the graph unchanged are not
    /// recorded either.
    pub fn edit<T, E, F>(&mut self, description: impl Into<String>, change: F) -> Result<T>
    where
        F: FnOnce(&mut JointGraph) -> std::result::Result<T, E>,
        E: Into<DocumentError>,
    {
        let before = GraphSnapshot::capture(self.graph_mut()?)?;
        let graph = self.graph_mut()?;
        let was_dirty = graph.is_dirty();

        let value = match change(&mut *graph) {
            Ok(value) => value,
            Err(error) => {
                graph.replace_with(before.restore()?);
                if !was_dirty {
                    graph.clear_dirty();
                }
                return Err(error.into());
            }
        };

        let after = GraphSnapshot::capture(graph)?;
        if after.data != before.data {
            let description = description.into();
            tracing::debug!(edit = %description, bytes = after.size(), "Recorded edit");
            self.history.record(description, before, after);
        }
        self.search.rebuild(&self.graph);
        Ok(value)
    }

    /// Apply an editor gesture as one undoable edit
    pub fn apply(&mut self, adapter: &EditorGraphAdapter, edit: VisualEdit) -> Result<EditOutcome> {
        let description = edit.describe();
        self.edit(description, |graph| adapter.apply(graph, edit))
    }

    /// Start listening for changes with `adapter`
    pub fn attach(&mut self, adapter: &mut EditorGraphAdapter) -> Result<()> {
        adapter.attach(self.graph_mut()?);
        Ok(())
    }

    /// Revert the last edit
    pub fn undo(&mut self) -> Result<String> {
        self.graph_mut()?;
        let edit = self.history.undo()?;
        let restored = edit.before.restore()?;
        self.graph_mut()?.replace_with(restored);
        self.search.rebuild(&self.graph);
        tracing::debug!(edit = %edit.description, "Undo");
        Ok(edit.description)
    }

    /// Reapply the last undone edit
    pub fn redo(&mut self) -> Result<String> {
        self.graph_mut()?;
        let edit = self.history.redo()?;
        let restored = edit.after.restore()?;
        self.graph_mut()?.replace_with(restored);
        self.search.rebuild(&self.graph);
        tracing::debug!(edit = %edit.description, "Redo");
        Ok(edit.description)
    }

    /// Save to the asset the document came from
    pub fn save(&mut self, store: &dyn AssetStore) -> Result<()> {
        let asset = self.asset.clone().ok_or(DocumentError::NoAsset)?;
        self.save_as(store, asset)
    }

    /// Save to `asset` and make it the document's asset
    pub fn save_as(&mut self, store: &dyn AssetStore, asset: AssetRef) -> Result<()> {
        store.save(&self.graph, &asset)?;
        if let Some(graph) = Arc::get_mut(&mut self.graph) {
            graph.clear_dirty();
        }
        self.asset = Some(asset);
        Ok(())
    }

    /// Replace the graph with the stored asset, dropping the history.
    ///
    /// Observers registered on the graph stay attached.
    pub fn reload(&mut self, store: &dyn AssetStore) -> Result<()> {
        let asset = self.asset.clone().ok_or(DocumentError::NoAsset)?;
        self.graph_mut()?;
        let loaded = store.load(&asset)?;
        let graph = self.graph_mut()?;
        graph.replace_with(loaded);
        graph.clear_dirty();
        self.history.clear();
        self.search.rebuild(&self.graph);
        tracing::info!(asset = %asset, "Reloaded document");
        Ok(())
    }

    /// Start a play session at `entry` over a shared handle to the graph
    pub fn play(&self, entry: NodeId, config: ExecutionConfig) -> std::result::Result<ExecutionEngine, ExecutionError> {
        let mut engine = ExecutionEngine::new(self.share(), config);
        engine.start(entry)?;
        Ok(engine)
    }
}

impl std::fmt::Debug for JointDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JointDocument")
            .field("asset", &self.asset)
            .field("graph", &self.graph.name)
            .field("nodes", &self.graph.node_count())
            .field("history", &self.history.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use joint::{ExecutionState, FileAssetStore, MemoryAssetStore, Node, PortDirection, PortRef, Signal};

    fn add_root(document: &mut JointDocument, adapter: &EditorGraphAdapter, template: &str) -> NodeId {
        match document
            .apply(
                adapter,
                VisualEdit::AddNode {
                    template: template.into(),
                    position: [0.0, 0.0],
                },
            )
            .unwrap()
        {
            EditOutcome::NodeCreated(id) => id,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_edit_undo_redo() {
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let adapter = EditorGraphAdapter::default();
        let node = add_root(&mut document, &adapter, "fragment");
        document
            .apply(
                &adapter,
                VisualEdit::Rename {
                    node,
                    name: "Intro".into(),
                },
            )
            .unwrap();
        assert_eq!(document.graph().node(node).unwrap().name, "Intro");
        assert_eq!(document.undo_description(), Some("Rename to Intro"));

        document.undo().unwrap();
        assert_ne!(document.graph().node(node).unwrap().name, "Intro");
        document.undo().unwrap();
        assert!(!document.graph().contains(node));
        assert!(matches!(document.undo(), Err(DocumentError::History(HistoryError::NothingToUndo))));

        document.redo().unwrap();
        document.redo().unwrap();
        assert_eq!(document.graph().node(node).unwrap().name, "Intro");
    }

    #[test]
    fn test_failed_edit_rolls_back() {
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let result = document.edit("Half done", |graph| {
            graph.add_root(Node::fragment("Kept?"))?;
            graph.remove_node(NodeId::new())
        });
        assert!(matches!(result, Err(DocumentError::Graph(GraphError::NodeNotFound(_)))));
        assert_eq!(document.graph().node_count(), 0);
        assert_eq!(document.history().undo_count, 0);
        assert!(!document.is_dirty());
    }

    #[test]
    fn test_failed_edit_keeps_saved_state_clean() {
        let store = MemoryAssetStore::new();
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let node = document
            .edit("Add", |graph| graph.add_root(Node::fragment("Intro")))
            .unwrap();
        document.save_as(&store, AssetRef::new("intro.joint")).unwrap();
        assert!(!document.is_dirty());

        let failed = document.edit("Broken rename", |graph| {
            graph.rename_node(node, "Half")?;
            graph.remove_node(NodeId::new())
        });
        assert!(failed.is_err());
        assert!(!document.is_dirty());
        assert_eq!(document.graph().node(node).unwrap().name, "Intro");

        // A document that was already dirty stays dirty
        document.edit("Rename", |graph| graph.rename_node(node, "Outro")).unwrap();
        let failed = document.edit("Broken remove", |graph| graph.remove_node(NodeId::new()));
        assert!(failed.is_err());
        assert!(document.is_dirty());
    }

    #[test]
    fn test_settings_configure_document() {
        let mut settings = EditorSettings::default();
        settings.history_depth = 2;
        settings.runtime.search.fuzzy = true;

        let mut document = JointDocument::new(JointGraph::new("Doc")).with_settings(&settings);
        assert_eq!(document.history().max_depth, 2);
        for name in ["One", "Two", "Three"] {
            document
                .edit(format!("Add {name}"), |graph| graph.add_root(Node::fragment(name)))
                .unwrap();
        }
        assert_eq!(document.history().undo_count, 2);

        let reward = document
            .edit("Add reward", |graph| graph.add_root(Node::fragment("Give Reward")))
            .unwrap();
        assert_eq!(document.search().query("grwd"), vec![reward]);
    }

    #[test]
    fn test_unchanged_edit_not_recorded() {
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let adapter = EditorGraphAdapter::default();
        let a = add_root(&mut document, &adapter, "event");
        let b = add_root(&mut document, &adapter, "terminal");
        let out = document.graph().node(a).unwrap().continue_port().unwrap().id;
        let input = document.graph().node(b).unwrap().flow_input().unwrap().id;
        let outcome = document
            .apply(
                &adapter,
                VisualEdit::Disconnect {
                    from: PortRef::new(a, out),
                    to: PortRef::new(b, input),
                },
            )
            .unwrap();
        assert_eq!(outcome, EditOutcome::Disconnected(false));
        assert_eq!(document.history().undo_count, 2);
    }

    #[test]
    fn test_edits_blocked_while_playing() {
        let mut graph = JointGraph::new("Play");
        let event = graph.add_root(Node::event("Greet", "Npc.Greet")).unwrap();
        let end = graph.add_root(Node::terminal("End")).unwrap();
        let out = graph.node(event).unwrap().continue_port().unwrap().id;
        let input = graph.node(end).unwrap().flow_input().unwrap().id;
        graph.connect(PortRef::new(event, out), PortRef::new(end, input), 0).unwrap();

        let mut document = JointDocument::new(graph);
        let mut engine = document.play(event, ExecutionConfig::default()).unwrap();
        assert_eq!(engine.run().unwrap().state, ExecutionState::Suspended);

        let blocked = document.edit("Rename", |graph| graph.rename_node(end, "Done"));
        assert!(matches!(blocked, Err(DocumentError::GraphInUse)));
        assert!(matches!(document.undo(), Err(DocumentError::GraphInUse)));

        engine.resume(Signal::new("Npc.Greet")).unwrap();
        engine.run().unwrap();
        assert_eq!(engine.state(), ExecutionState::Completed);
        drop(engine);

        document.edit("Rename", |graph| graph.rename_node(end, "Done")).unwrap();
        assert_eq!(document.graph().node(end).unwrap().name, "Done");
    }

    #[test]
    fn test_search_follows_edits() {
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let node = document
            .edit("Add", |graph| graph.add_root(Node::fragment("Greeting")))
            .unwrap();
        assert_eq!(document.search().query("greet"), vec![node]);
        document.undo().unwrap();
        assert!(document.search().query("greet").is_empty());
    }

    #[test]
    fn test_save_reload_memory_store() {
        let store = MemoryAssetStore::new();
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        assert!(matches!(document.save(&store), Err(DocumentError::NoAsset)));

        let node = document
            .edit("Add", |graph| graph.add_root(Node::fragment("Intro")))
            .unwrap();
        assert!(document.is_dirty());
        document.save_as(&store, AssetRef::new("quests/intro.joint")).unwrap();
        assert!(!document.is_dirty());

        document
            .edit("Rename", |graph| graph.rename_node(node, "Changed"))
            .unwrap();
        document.reload(&store).unwrap();
        assert_eq!(document.graph().node(node).unwrap().name, "Intro");
        assert_eq!(document.history().undo_count, 0);
        assert!(!document.is_dirty());
    }

    #[test]
    fn test_open_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path());
        let asset = AssetRef::new("intro.json");

        let mut document = JointDocument::new(JointGraph::new("Files"));
        document
            .edit("Add", |graph| graph.add_root(Node::fragment("Root")))
            .unwrap();
        document.save_as(&store, asset.clone()).unwrap();

        let reopened = JointDocument::open(&store, asset.clone()).unwrap();
        assert_eq!(reopened.asset(), Some(&asset));
        assert_eq!(reopened.graph(), document.graph());
        assert!(reopened
            .graph()
            .find_by_name("Root")
            .is_some_and(|n| n.port_named("In", PortDirection::Input).is_some()));
    }

    #[test]
    fn test_adapter_stays_attached_across_undo() {
        let mut document = JointDocument::new(JointGraph::new("Doc"));
        let mut adapter = EditorGraphAdapter::default();
        document.attach(&mut adapter).unwrap();
        let node = add_root(&mut document, &adapter, "fragment");
        assert!(adapter.visual(document.graph()).find(node).is_some());

        document.undo().unwrap();
        assert!(adapter.is_stale());
        assert!(adapter.visual(document.graph()).find(node).is_none());
    }
}
