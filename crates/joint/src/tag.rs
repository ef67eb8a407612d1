// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hierarchical node tags.
//!
//! Tags are dotted paths such as `Dialogue.Choice.Accept`. A tag matches
//! another tag when they are equal or, in non-exact mode, when the other tag
//! is one of its parents (`Dialogue.Choice.Accept` matches `Dialogue.Choice`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hierarchical, dot separated tag attached to nodes and signals
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTag(String);

impl NodeTag {
    /// Create a tag, trimming surrounding whitespace and stray separators
    pub fn new(tag: impl AsRef<str>) -> Self {
        let cleaned = tag
            .as_ref()
            .split('.')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join(".");
        Self(cleaned)
    }

    /// The full dotted path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the tag is empty (matches nothing)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments from the outermost parent to the leaf
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// The last segment of the tag
    pub fn leaf(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or("")
    }

    /// Direct parent of this tag, if any
    pub fn parent(&self) -> Option<NodeTag> {
        self.0.rsplit_once('.').map(|(parent, _)| NodeTag(parent.to_string()))
    }

    /// Check this tag against `other`.
    ///
    /// With `exact` the tags must be identical. Otherwise `other` may also be
    /// any parent of this tag.
    pub fn matches(&self, other: &NodeTag, exact: bool) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.0 == other.0 {
            return true;
        }
        !exact
            && self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0.as_bytes()[other.0.len()] == b'.'
    }

    /// Whether this tag matches any of `others`
    pub fn matches_any<'a>(&self, others: impl IntoIterator<Item = &'a NodeTag>, exact: bool) -> bool {
        others.into_iter().any(|other| self.matches(other, exact))
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeTag {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
