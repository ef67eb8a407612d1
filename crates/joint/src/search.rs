// SPDX-License-Identifier: MIT OR Apache-2.0
//! Name, tag and category lookup over a graph.
//!
//! The index is a derived view: [`SearchIndex::index`] always rebuilds from
//! the graph, and structural changes only ever remove entries. A node that
//! was renamed or added is found again after the next rebuild.

use crate::graph::{JointGraph, StructuralChange};
use crate::node::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which node attribute an entry was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Display name
    Name,
    /// One of the node's tags
    Tag,
    /// Search category
    Category,
}

/// Quality of a key match, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRank {
    /// Whole key equals the query
    Exact,
    /// Key starts with the query
    Prefix,
    /// Query appears inside the key
    Substring,
    /// Query characters appear in order
    Fuzzy,
}

/// Ranking policy. Both arguments are already case folded.
pub trait MatchRanker: Send + Sync + fmt::Debug {
    /// Rank `key` against `query`, `None` when it does not match
    fn rank(&self, key: &str, query: &str) -> Option<MatchRank>;
}

/// Exact, then prefix, then substring, then optionally subsequence matches
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredRanker {
    /// Accept subsequence matches as the lowest tier
    pub fuzzy: bool,
}

impl MatchRanker for TieredRanker {
    fn rank(&self, key: &str, query: &str) -> Option<MatchRank> {
        if key == query {
            Some(MatchRank::Exact)
        } else if key.starts_with(query) {
            Some(MatchRank::Prefix)
        } else if key.contains(query) {
            Some(MatchRank::Substring)
        } else if self.fuzzy && is_subsequence(query, key) {
            Some(MatchRank::Fuzzy)
        } else {
            None
        }
    }
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Accept subsequence matches
    pub fuzzy: bool,
    /// Index node tags
    pub index_tags: bool,
    /// Index node categories
    pub index_categories: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy: false,
            index_tags: true,
            index_categories: true,
        }
    }
}

impl SearchConfig {
    /// Ranker described by this configuration
    pub fn ranker(&self) -> Arc<dyn MatchRanker> {
        Arc::new(TieredRanker { fuzzy: self.fuzzy })
    }
}

/// One searchable key
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Key as written on the node
    pub key: String,
    folded: String,
    /// Attribute the key came from
    pub kind: KeyKind,
    /// Owning node
    pub node: NodeId,
    /// Node insertion order in the graph
    pub order: usize,
}

/// A ranked query result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matching node
    pub node: NodeId,
    /// Best rank over the node's keys
    pub rank: MatchRank,
    /// Key that produced the best rank
    pub key: String,
    /// Kind of that key
    pub kind: KeyKind,
}

/// Search index over one graph
#[derive(Debug, Clone)]
pub struct SearchIndex {
    config: SearchConfig,
    ranker: Arc<dyn MatchRanker>,
    entries: Vec<IndexEntry>,
    stale: bool,
}

impl SearchIndex {
    /// Create an empty index
    pub fn new(config: SearchConfig) -> Self {
        let ranker = config.ranker();
        Self {
            config,
            ranker,
            entries: Vec::new(),
            stale: false,
        }
    }

    /// Create an empty index with a custom ranking policy
    pub fn with_ranker(config: SearchConfig, ranker: Arc<dyn MatchRanker>) -> Self {
        Self {
            config,
            ranker,
            entries: Vec::new(),
            stale: false,
        }
    }

    /// Build an index for `graph`
    pub fn build(graph: &JointGraph, config: SearchConfig) -> Self {
        let mut index = Self::new(config);
        index.index(graph);
        index
    }

    /// Rebuild every entry from the graph
    pub fn index(&mut self, graph: &JointGraph) {
        self.entries.clear();
        for (order, node) in graph.nodes().enumerate() {
            self.push(&node.name, KeyKind::Name, node.id, order);
            if self.config.index_tags {
                for tag in &node.tags {
                    self.push(tag.as_str(), KeyKind::Tag, node.id, order);
                }
            }
            if self.config.index_categories {
                self.push(&node.category, KeyKind::Category, node.id, order);
            }
        }
        self.stale = false;
        tracing::debug!(graph = %graph.name, entries = self.entries.len(), "Rebuilt search index");
    }

    fn push(&mut self, key: &str, kind: KeyKind, node: NodeId, order: usize) {
        if key.is_empty() {
            return;
        }
        self.entries.push(IndexEntry {
            key: key.to_string(),
            folded: key.to_lowercase(),
            kind,
            node,
            order,
        });
    }

    /// Ranked hits for `key` over every key kind
    pub fn hits(&self, key: &str) -> Vec<SearchHit> {
        self.hits_for(key, None)
    }

    /// Ranked hits for `key`, matching only keys of `kind`
    pub fn hits_with(&self, key: &str, kind: KeyKind) -> Vec<SearchHit> {
        self.hits_for(key, Some(kind))
    }

    /// Ranked distinct node ids for `key`.
    ///
    /// Matches are ranked once when called; the iterator then walks the
    /// sorted entries without copying their keys.
    pub fn query(&self, key: &str) -> impl Iterator<Item = NodeId> + '_ {
        self.ranked(key, None).into_iter().map(|(_, entry)| entry.node)
    }

    /// Ranked distinct node ids for `key`, matching only keys of `kind`
    pub fn query_with(&self, key: &str, kind: KeyKind) -> impl Iterator<Item = NodeId> + '_ {
        self.ranked(key, Some(kind)).into_iter().map(|(_, entry)| entry.node)
    }

    fn hits_for(&self, key: &str, kind: Option<KeyKind>) -> Vec<SearchHit> {
        self.ranked(key, kind)
            .into_iter()
            .map(|(rank, entry)| SearchHit {
                node: entry.node,
                rank,
                key: entry.key.clone(),
                kind: entry.kind,
            })
            .collect()
    }

    /// Best matching entry per node, sorted by rank then insertion order
    fn ranked(&self, key: &str, kind: Option<KeyKind>) -> Vec<(MatchRank, &IndexEntry)> {
        let query = key.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut best: HashMap<NodeId, (MatchRank, &IndexEntry)> = HashMap::new();
        for entry in &self.entries {
            if kind.is_some_and(|k| k != entry.kind) {
                continue;
            }
            let Some(rank) = self.ranker.rank(&entry.folded, &query) else {
                continue;
            };
            best.entry(entry.node)
                .and_modify(|current| {
                    if rank < current.0 {
                        *current = (rank, entry);
                    }
                })
                .or_insert((rank, entry));
        }

        let mut ranked: Vec<_> = best.into_values().collect();
        ranked.sort_by_key(|(rank, entry)| (*rank, entry.order));
        ranked
    }

    /// Drop every entry of a node
    pub fn invalidate(&mut self, node_id: NodeId) {
        self.entries.retain(|e| e.node != node_id);
    }

    /// Keep the index consistent with a structural change
    pub fn apply(&mut self, change: &StructuralChange) {
        match change {
            StructuralChange::NodesRemoved { nodes } => {
                self.entries.retain(|e| !nodes.contains(&e.node));
            }
            StructuralChange::NodeRenamed { node } | StructuralChange::NodeDataChanged { node } => {
                self.invalidate(*node);
                self.stale = true;
            }
            StructuralChange::Reset => {
                self.entries.clear();
                self.stale = true;
            }
            StructuralChange::NodeAdded { .. } => self.stale = true,
            StructuralChange::NodeMoved { .. }
            | StructuralChange::Connected { .. }
            | StructuralChange::Disconnected { .. } => {}
        }
    }

    /// Whether entries are missing since the last rebuild
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// All entries
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Whether any entry references `node_id`
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.entries.iter().any(|e| e.node == node_id)
    }

    /// Configuration
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

/// An index shared between the editor and query callers.
///
/// Rebuilds happen off-lock and swap in a fresh snapshot; readers keep
/// querying the previous snapshot until the swap.
#[derive(Debug)]
pub struct SharedSearchIndex {
    current: RwLock<Arc<SearchIndex>>,
}

impl SharedSearchIndex {
    /// Create an empty shared index
    pub fn new(config: SearchConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(SearchIndex::new(config))),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<SearchIndex> {
        Arc::clone(&self.current.read())
    }

    /// Rebuild from `graph` and publish the result
    pub fn rebuild(&self, graph: &JointGraph) {
        let config = self.current.read().config().clone();
        let fresh = SearchIndex::build(graph, config);
        *self.current.write() = Arc::new(fresh);
    }

    /// Ranked node ids against the current snapshot
    pub fn query(&self, key: &str) -> Vec<NodeId> {
        self.snapshot().query(key).collect()
    }

    /// Apply a structural change to the published snapshot
    pub fn apply(&self, change: &StructuralChange) {
        let mut guard = self.current.write();
        Arc::make_mut(&mut guard).apply(change);
    }
}

impl Default for SharedSearchIndex {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_greet_ranking() {
        let mut graph = JointGraph::new("Npc");
        let substring = graph.add_root(Node::fragment("Say Greet")).unwrap();
        let prefix_a = graph.add_root(Node::fragment("Greeting")).unwrap();
        let exact = graph.add_root(Node::fragment("greet")).unwrap();
        let prefix_b = graph.add_root(Node::fragment("Greet Player")).unwrap();
        let unrelated = graph.add_root(Node::fragment("Farewell")).unwrap();

        let index = SearchIndex::build(&graph, SearchConfig::default());
        let results: Vec<NodeId> = index.query("GREET").collect();
        assert_eq!(results, vec![exact, prefix_a, prefix_b, substring]);
        assert!(!results.contains(&unrelated));
    }

    #[test]
    fn test_best_key_wins() {
        let mut graph = JointGraph::default();
        let named = graph.add_root(Node::fragment("Old Greeter")).unwrap();
        let tagged = graph
            .add_root(Node::fragment("Hello").with_tag("Greet.Formal"))
            .unwrap();

        let index = SearchIndex::build(&graph, SearchConfig::default());
        let hits = index.hits("greet");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node, tagged);
        assert_eq!(hits[0].kind, KeyKind::Tag);
        assert_eq!(hits[0].rank, MatchRank::Prefix);
        assert_eq!(hits[1].node, named);

        let by_name: Vec<NodeId> = index.query_with("greet", KeyKind::Name).collect();
        assert_eq!(by_name, vec![named]);
    }

    #[test]
    fn test_query_follows_hit_order() {
        let mut graph = JointGraph::default();
        for name in ["Quest Log", "quest", "Side Quest", "Questline"] {
            graph.add_root(Node::fragment(name)).unwrap();
        }
        let index = SearchIndex::build(&graph, SearchConfig::default());
        let from_hits: Vec<NodeId> = index.hits("quest").iter().map(|hit| hit.node).collect();
        let mut lazy = index.query("quest");
        assert_eq!(lazy.next(), from_hits.first().copied());
        let rest: Vec<NodeId> = lazy.collect();
        assert_eq!(rest, from_hits[1..]);
        assert_eq!(from_hits.len(), 4);
    }

    #[test]
    fn test_fuzzy_is_opt_in() {
        let mut graph = JointGraph::default();
        let node = graph.add_root(Node::fragment("Give Reward")).unwrap();

        let strict = SearchIndex::build(&graph, SearchConfig::default());
        assert_eq!(strict.query("grwd").count(), 0);

        let fuzzy = SearchIndex::build(
            &graph,
            SearchConfig {
                fuzzy: true,
                ..SearchConfig::default()
            },
        );
        let hits = fuzzy.hits("grwd");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, node);
        assert_eq!(hits[0].rank, MatchRank::Fuzzy);
    }

    #[test]
    fn test_empty_query() {
        let mut graph = JointGraph::default();
        graph.add_root(Node::fragment("Anything")).unwrap();
        let index = SearchIndex::build(&graph, SearchConfig::default());
        assert_eq!(index.query("   ").count(), 0);
    }

    #[test]
    fn test_removed_nodes_leave_no_entries() {
        let mut graph = JointGraph::default();
        let shared = Arc::new(SharedSearchIndex::default());
        let root = graph.add_root(Node::fragment("Quest")).unwrap();
        let child = graph.add_sub_node(root, Node::fragment("Quest Step"), 0).unwrap();
        let grandchild = graph
            .add_sub_node(child, Node::fragment("Quest Reward").with_tag("Quest.Reward"), 0)
            .unwrap();
        shared.rebuild(&graph);

        let sink = Arc::clone(&shared);
        graph.on_structural_change(move |change| sink.apply(change));

        graph.remove_sub_node(root, child).unwrap();
        let snapshot = shared.snapshot();
        assert!(!snapshot.contains_node(child));
        assert!(!snapshot.contains_node(grandchild));
        assert_eq!(shared.query("quest"), vec![root]);
    }

    #[test]
    fn test_rename_invalidates_until_rebuild() {
        let mut graph = JointGraph::default();
        let node = graph.add_root(Node::fragment("Alpha")).unwrap();
        let mut index = SearchIndex::build(&graph, SearchConfig::default());

        graph.rename_node(node, "Beta").unwrap();
        index.apply(&StructuralChange::NodeRenamed { node });
        assert!(index.is_stale());
        assert_eq!(index.query("alpha").count(), 0);

        index.index(&graph);
        assert!(!index.is_stale());
        assert_eq!(index.query("beta").collect::<Vec<_>>(), vec![node]);
    }

    #[test]
    fn test_snapshot_survives_rebuild() {
        let mut graph = JointGraph::default();
        let first = graph.add_root(Node::fragment("First")).unwrap();
        let shared = SharedSearchIndex::default();
        shared.rebuild(&graph);
        let old = shared.snapshot();

        graph.add_root(Node::fragment("First Again")).unwrap();
        shared.rebuild(&graph);

        assert_eq!(old.query("first").collect::<Vec<_>>(), vec![first]);
        assert_eq!(shared.query("first").len(), 2);
    }
}
