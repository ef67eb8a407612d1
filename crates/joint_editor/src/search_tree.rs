// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outliner tree over a graph with text and tag filtering.
//!
//! Roots are top level items and sub-nodes nest below their owner. Siblings
//! are sorted naturally so `Step2` comes before `Step10`.

use joint::{JointGraph, Node, NodeId, NodeTag};
use std::cmp::Ordering;

/// Visibility of an item after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterResult {
    /// Neither the item nor any descendant matches
    Hidden,
    /// The item matches
    #[default]
    Shown,
    /// The item does not match but a descendant does
    ShownDescendant,
}

impl FilterResult {
    /// Whether the item appears in the tree
    pub fn is_visible(self) -> bool {
        self != Self::Hidden
    }
}

/// One row of the tree
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTreeItem {
    /// Node shown
    pub node: NodeId,
    /// Row label
    pub label: String,
    /// Category column
    pub category: String,
    /// Tags used by tag filters
    pub tags: Vec<NodeTag>,
    /// Children in natural order
    pub children: Vec<SearchTreeItem>,
    /// Result of the last filter pass
    pub filter: FilterResult,
}

impl SearchTreeItem {
    fn from_node(graph: &JointGraph, node: &Node) -> Self {
        let mut children: Vec<_> = node
            .sub_nodes
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|child| Self::from_node(graph, child))
            .collect();
        children.sort_by(|a, b| natural_cmp(&a.label, &b.label));
        Self {
            node: node.id,
            label: node.name.clone(),
            category: node.category.clone(),
            tags: node.tags.clone(),
            children,
            filter: FilterResult::Shown,
        }
    }

    fn apply(&mut self, filter: &SearchTreeFilter) -> FilterResult {
        let mut any_child = false;
        for child in &mut self.children {
            any_child |= child.apply(filter).is_visible();
        }
        self.filter = if filter.matches(self) {
            FilterResult::Shown
        } else if any_child {
            FilterResult::ShownDescendant
        } else {
            FilterResult::Hidden
        };
        self.filter
    }
}

/// Text and tag filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchTreeFilter {
    /// Case-insensitive substring of the label or category
    pub text: String,
    /// Tags an item must carry, all of them
    pub tags: Vec<NodeTag>,
    /// Require exact tag matches instead of hierarchical ones
    pub exact_tags: bool,
}

impl SearchTreeFilter {
    /// Filter on text only
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Add a required tag
    pub fn with_tag(mut self, tag: impl Into<NodeTag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether the filter lets everything through
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tags.is_empty()
    }

    fn matches(&self, item: &SearchTreeItem) -> bool {
        let text = self.text.trim().to_lowercase();
        let text_ok = text.is_empty()
            || item.label.to_lowercase().contains(&text)
            || item.category.to_lowercase().contains(&text);
        let tags_ok = self
            .tags
            .iter()
            .all(|wanted| item.tags.iter().any(|tag| tag.matches(wanted, self.exact_tags)));
        text_ok && tags_ok
    }
}

/// A visible row with its indentation depth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleRow<'a> {
    /// Depth below the roots, always 0 when flattened
    pub depth: usize,
    /// The row
    pub item: &'a SearchTreeItem,
}

/// Filterable outliner tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchTree {
    roots: Vec<SearchTreeItem>,
    filter: SearchTreeFilter,
    /// List matching items without their ancestors
    pub flatten: bool,
}

impl SearchTree {
    /// Build the tree for a graph
    pub fn build(graph: &JointGraph) -> Self {
        let mut roots: Vec<_> = graph
            .roots()
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| SearchTreeItem::from_node(graph, node))
            .collect();
        roots.sort_by(|a, b| natural_cmp(&a.label, &b.label));
        Self {
            roots,
            filter: SearchTreeFilter::default(),
            flatten: false,
        }
    }

    /// Top level items
    pub fn roots(&self) -> &[SearchTreeItem] {
        &self.roots
    }

    /// Active filter
    pub fn filter(&self) -> &SearchTreeFilter {
        &self.filter
    }

    /// Replace the filter and recompute visibility
    pub fn set_filter(&mut self, filter: SearchTreeFilter) {
        for root in &mut self.roots {
            root.apply(&filter);
        }
        self.filter = filter;
    }

    /// Find an item by node
    pub fn find(&self, node: NodeId) -> Option<&SearchTreeItem> {
        fn search(items: &[SearchTreeItem], node: NodeId) -> Option<&SearchTreeItem> {
            items
                .iter()
                .find_map(|item| if item.node == node { Some(item) } else { search(&item.children, node) })
        }
        search(&self.roots, node)
    }

    /// Rows to draw, in display order
    pub fn visible(&self) -> Vec<VisibleRow<'_>> {
        let mut rows = Vec::new();
        for root in &self.roots {
            self.collect(root, 0, &mut rows);
        }
        rows
    }

    fn collect<'a>(&self, item: &'a SearchTreeItem, depth: usize, rows: &mut Vec<VisibleRow<'a>>) {
        match (item.filter, self.flatten) {
            (FilterResult::Hidden, _) => return,
            (FilterResult::Shown, true) => rows.push(VisibleRow { depth: 0, item }),
            (FilterResult::ShownDescendant, true) => {}
            (_, false) => rows.push(VisibleRow { depth, item }),
        }
        for child in &item.children {
            self.collect(child, depth + 1, rows);
        }
    }
}

/// Split a label into its text and a trailing number
fn split_numeric_suffix(label: &str) -> (&str, Option<u64>) {
    let digits = label.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (label, None);
    }
    let (prefix, suffix) = label.split_at(label.len() - digits);
    (prefix, suffix.parse().ok())
}

/// Natural label order: text case-insensitively, then trailing number, then length
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (prefix_a, number_a) = split_numeric_suffix(a);
    let (prefix_b, number_b) = split_numeric_suffix(b);
    prefix_a
        .to_lowercase()
        .cmp(&prefix_b.to_lowercase())
        .then(number_a.cmp(&number_b))
        .then(a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (JointGraph, NodeId, NodeId, NodeId) {
        let mut graph = JointGraph::new("Tree");
        let quest = graph.add_root(Node::fragment("Quest").with_tag("Quest.Main")).unwrap();
        let step10 = graph.add_sub_node(quest, Node::fragment("Step10"), 0).unwrap();
        graph.add_sub_node(quest, Node::fragment("Step2"), 1).unwrap();
        let reward = graph
            .add_sub_node(step10, Node::action("Reward", "set_variables").with_tag("Quest.Reward"), 0)
            .unwrap();
        graph.add_root(Node::fragment("ambient")).unwrap();
        (graph, quest, step10, reward)
    }

    #[test]
    fn test_natural_order() {
        let mut labels = vec!["Step10", "step2", "Step", "Step02", "Alpha"];
        labels.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(labels, vec!["Alpha", "Step", "step2", "Step02", "Step10"]);
    }

    #[test]
    fn test_tree_structure_sorted() {
        let (graph, quest, _, _) = sample();
        let tree = SearchTree::build(&graph);
        let labels: Vec<_> = tree.roots().iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["ambient", "Quest"]);
        let children: Vec<_> = tree.find(quest).unwrap().children.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(children, vec!["Step2", "Step10"]);
        assert_eq!(tree.visible().len(), 5);
    }

    #[test]
    fn test_text_filter_keeps_ancestors() {
        let (graph, quest, step10, reward) = sample();
        let mut tree = SearchTree::build(&graph);
        tree.set_filter(SearchTreeFilter::text("rew"));

        assert_eq!(tree.find(reward).unwrap().filter, FilterResult::Shown);
        assert_eq!(tree.find(step10).unwrap().filter, FilterResult::ShownDescendant);
        assert_eq!(tree.find(quest).unwrap().filter, FilterResult::ShownDescendant);

        let rows: Vec<_> = tree.visible().iter().map(|r| (r.depth, r.item.node)).collect();
        assert_eq!(rows, vec![(0, quest), (1, step10), (2, reward)]);

        tree.flatten = true;
        let rows: Vec<_> = tree.visible().iter().map(|r| (r.depth, r.item.node)).collect();
        assert_eq!(rows, vec![(0, reward)]);
    }

    #[test]
    fn test_tag_filter() {
        let (graph, quest, _, reward) = sample();
        let mut tree = SearchTree::build(&graph);

        tree.set_filter(SearchTreeFilter::default().with_tag("Quest"));
        assert_eq!(tree.find(quest).unwrap().filter, FilterResult::Shown);
        assert_eq!(tree.find(reward).unwrap().filter, FilterResult::Shown);

        tree.set_filter(SearchTreeFilter {
            exact_tags: true,
            ..SearchTreeFilter::default().with_tag("Quest")
        });
        assert!(tree.visible().is_empty());

        tree.set_filter(SearchTreeFilter::default());
        assert!(tree.filter().is_empty());
        assert_eq!(tree.visible().len(), 5);
    }
}
