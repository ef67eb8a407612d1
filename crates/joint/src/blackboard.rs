// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-execution variable store.

use crate::port::PortValue;
use crate::tag::NodeTag;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Variables and received signal tags of one execution cursor.
///
/// Every observable change bumps the progress epoch; the engine's cycle
/// detection treats an unchanged epoch as "no progress".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    variables: IndexMap<String, PortValue>,
    tags: Vec<NodeTag>,
    epoch: u64,
}

impl Blackboard {
    /// Create an empty blackboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a variable
    pub fn get(&self, name: &str) -> Option<&PortValue> {
        self.variables.get(name)
    }

    /// Write a variable, returning whether the stored value changed
    pub fn set(&mut self, name: impl Into<String>, value: PortValue) -> bool {
        let name = name.into();
        if self.variables.get(&name) == Some(&value) {
            return false;
        }
        self.variables.insert(name, value);
        self.epoch += 1;
        true
    }

    /// Remove a variable
    pub fn remove(&mut self, name: &str) -> Option<PortValue> {
        let removed = self.variables.shift_remove(name);
        if removed.is_some() {
            self.epoch += 1;
        }
        removed
    }

    /// All variables in write order
    pub fn variables(&self) -> impl Iterator<Item = (&str, &PortValue)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Record a received tag, returning whether it was new
    pub fn add_tag(&mut self, tag: NodeTag) -> bool {
        if tag.is_empty() || self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        self.epoch += 1;
        true
    }

    /// Whether any received tag matches `tag`
    pub fn has_tag(&self, tag: &NodeTag, exact: bool) -> bool {
        self.tags.iter().any(|own| own.matches(tag, exact))
    }

    /// Received tags in arrival order
    pub fn tags(&self) -> &[NodeTag] {
        &self.tags
    }

    /// Current progress epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_only_moves_on_change() {
        let mut board = Blackboard::new();
        assert!(board.set("gold", PortValue::Int(5)));
        assert_eq!(board.epoch(), 1);
        assert!(!board.set("gold", PortValue::Int(5)));
        assert_eq!(board.epoch(), 1);
        assert!(board.add_tag(NodeTag::new("Quest.Started")));
        assert!(!board.add_tag(NodeTag::new("Quest.Started")));
        assert_eq!(board.epoch(), 2);
        assert!(board.remove("gold").is_some());
        assert!(board.remove("gold").is_none());
        assert_eq!(board.epoch(), 3);
    }

    #[test]
    fn test_tag_lookup() {
        let mut board = Blackboard::new();
        board.add_tag(NodeTag::new("Input.Confirm.Gamepad"));
        assert!(board.has_tag(&NodeTag::new("Input.Confirm"), false));
        assert!(!board.has_tag(&NodeTag::new("Input.Confirm"), true));
    }
}
