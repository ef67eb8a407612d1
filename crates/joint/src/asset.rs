// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph persistence.
//!
//! Graphs are stored inside a versioned [`JointAsset`] envelope, as RON
//! (`.joint`) or JSON (`.json`). Loading always validates: a graph with
//! structural violations never leaves [`AssetStore::load`].

use crate::graph::{JointGraph, Violation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Current asset format version
pub const ASSET_FORMAT_VERSION: u32 = 1;

/// Extension of RON assets
pub const RON_EXTENSION: &str = "joint";
/// Extension of JSON assets
pub const JSON_EXTENSION: &str = "json";

/// On-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    /// Rusty Object Notation
    Ron,
    /// JSON
    Json,
}

impl AssetFormat {
    /// Format for a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            RON_EXTENSION => Some(Self::Ron),
            JSON_EXTENSION => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logical asset location, relative to a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetRef(pub String);

impl AssetRef {
    /// Create an asset reference
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Encoding chosen by the extension
    pub fn format(&self) -> Result<AssetFormat, AssetError> {
        Path::new(&self.0)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(AssetFormat::from_extension)
            .ok_or_else(|| AssetError::UnsupportedFormat(self.clone()))
    }

    /// Asset path as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Versioned envelope around a stored graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointAsset {
    /// Format version
    pub version: u32,
    /// The graph
    pub graph: JointGraph,
}

impl JointAsset {
    /// Wrap a graph at the current format version
    pub fn new(graph: JointGraph) -> Self {
        Self {
            version: ASSET_FORMAT_VERSION,
            graph,
        }
    }

    /// Encode in the given format
    pub fn encode(&self, format: AssetFormat) -> Result<String, AssetError> {
        match format {
            AssetFormat::Ron => {
                let config = ron::ser::PrettyConfig::default().struct_names(true);
                ron::ser::to_string_pretty(self, config).map_err(|e| AssetError::Serialize(e.to_string()))
            }
            AssetFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| AssetError::Serialize(e.to_string()))
            }
        }
    }

    /// Decode and validate. `asset` only labels errors.
    pub fn decode(text: &str, format: AssetFormat, asset: &AssetRef) -> Result<Self, AssetError> {
        let corrupt = |reason: String| AssetError::CorruptAsset {
            asset: asset.clone(),
            reason,
        };
        let decoded: Self = match format {
            AssetFormat::Ron => ron::from_str(text).map_err(|e| corrupt(e.to_string()))?,
            AssetFormat::Json => serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?,
        };

        if decoded.version > ASSET_FORMAT_VERSION {
            return Err(AssetError::UnsupportedVersion {
                asset: asset.clone(),
                found: decoded.version,
                supported: ASSET_FORMAT_VERSION,
            });
        }

        let violations = decoded.graph.validate();
        if !violations.is_empty() {
            return Err(corrupt(describe(&violations)));
        }
        Ok(decoded)
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Asset persistence error
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The asset could not be parsed or failed validation
    #[error("Corrupt asset {asset}: {reason}")]
    CorruptAsset {
        /// Offending asset
        asset: AssetRef,
        /// What was wrong
        reason: String,
    },

    /// No asset at this location
    #[error("Asset not found: {0}")]
    NotFound(AssetRef),

    /// Unknown file extension
    #[error("Unsupported asset format: {0}")]
    UnsupportedFormat(AssetRef),

    /// Written by a newer version
    #[error("Asset {asset} has version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        /// Offending asset
        asset: AssetRef,
        /// Stored version
        found: u32,
        /// Newest readable version
        supported: u32,
    },

    /// Encoding failed
    #[error("Failed to serialize asset: {0}")]
    Serialize(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where graphs are loaded from and saved to
pub trait AssetStore: Send + Sync {
    /// Load and validate a graph
    fn load(&self, asset: &AssetRef) -> Result<JointGraph, AssetError>;

    /// Save a graph. Either the whole asset is written or the previous one stays.
    fn save(&self, graph: &JointGraph, asset: &AssetRef) -> Result<(), AssetError>;

    /// Whether the asset exists
    fn exists(&self, asset: &AssetRef) -> bool;
}

/// Assets as files below a root directory
#[derive(Debug, Clone)]
pub struct FileAssetStore {
    root: PathBuf,
}

impl FileAssetStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an asset
    pub fn path_of(&self, asset: &AssetRef) -> PathBuf {
        self.root.join(&asset.0)
    }

    /// Asset reference for a file below the root
    pub fn asset_for(&self, path: &Path) -> Option<AssetRef> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let text = relative.to_str()?.replace('\\', "/");
        Some(AssetRef(text))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.tmp"))
    }
}

impl AssetStore for FileAssetStore {
    fn load(&self, asset: &AssetRef) -> Result<JointGraph, AssetError> {
        let format = asset.format()?;
        let path = self.path_of(asset);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound(asset.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut graph = JointAsset::decode(&text, format, asset)?.graph;
        graph.clear_dirty();
        tracing::info!(asset = %asset, nodes = graph.node_count(), "Loaded graph");
        Ok(graph)
    }

    fn save(&self, graph: &JointGraph, asset: &AssetRef) -> Result<(), AssetError> {
        let format = asset.format()?;
        let violations = graph.validate();
        if !violations.is_empty() {
            tracing::warn!(asset = %asset, count = violations.len(), "Saving graph with violations");
        }
        let text = JointAsset::new(graph.clone()).encode(format)?;

        let path = self.path_of(asset);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = Self::temp_path(&path);
        std::fs::write(&temp, text)?;
        if let Err(e) = std::fs::rename(&temp, &path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        tracing::info!(asset = %asset, path = %path.display(), "Saved graph");
        Ok(())
    }

    fn exists(&self, asset: &AssetRef) -> bool {
        self.path_of(asset).is_file()
    }
}

/// In-memory store holding encoded assets
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    assets: Mutex<BTreeMap<AssetRef, String>>,
}

impl MemoryAssetStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text, bypassing encoding
    pub fn insert_raw(&self, asset: AssetRef, text: impl Into<String>) {
        self.assets.lock().insert(asset, text.into());
    }

    /// Encoded text of an asset
    pub fn raw(&self, asset: &AssetRef) -> Option<String> {
        self.assets.lock().get(asset).cloned()
    }

    /// Stored assets in order
    pub fn assets(&self) -> Vec<AssetRef> {
        self.assets.lock().keys().cloned().collect()
    }
}

impl AssetStore for MemoryAssetStore {
    fn load(&self, asset: &AssetRef) -> Result<JointGraph, AssetError> {
        let format = asset.format()?;
        let text = self.raw(asset).ok_or_else(|| AssetError::NotFound(asset.clone()))?;
        let mut graph = JointAsset::decode(&text, format, asset)?.graph;
        graph.clear_dirty();
        Ok(graph)
    }

    fn save(&self, graph: &JointGraph, asset: &AssetRef) -> Result<(), AssetError> {
        let text = JointAsset::new(graph.clone()).encode(asset.format()?)?;
        self.assets.lock().insert(asset.clone(), text);
        Ok(())
    }

    fn exists(&self, asset: &AssetRef) -> bool {
        self.assets.lock().contains_key(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::PortRef;
    use crate::node::{Node, Requirement};
    use crate::port::{Port, PortType, PortValue};

    fn sample_graph() -> JointGraph {
        let mut graph = JointGraph::new("Tavern");
        let greet = graph
            .add_root(Node::event("Greet", "Npc.Greet").with_position(10.0, 20.0))
            .unwrap();
        let line = graph.add_root(Node::fragment("Line").with_tag("Dialogue.Line")).unwrap();
        graph
            .add_sub_node(
                line,
                Node::condition("Has Gold", Requirement::VariableTrue("gold".into()))
                    .with_port(Port::input("Amount", PortType::Int).with_value(PortValue::Int(3))),
                0,
            )
            .unwrap();
        graph
            .add_sub_node(line, Node::action("Pay", "set_variables").with_property("paid", true), 1)
            .unwrap();
        let out = graph.node(greet).unwrap().continue_port().unwrap().id;
        let input = graph.node(line).unwrap().flow_input().unwrap().id;
        graph
            .connect(PortRef::new(greet, out), PortRef::new(line, input), 2)
            .unwrap();
        graph
    }

    #[test]
    fn test_file_round_trip_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path());
        let graph = sample_graph();
        assert!(graph.validate().is_empty());

        for name in ["dialogue/tavern.joint", "dialogue/tavern.json"] {
            let asset = AssetRef::new(name);
            store.save(&graph, &asset).unwrap();
            assert!(store.exists(&asset));
            let loaded = store.load(&asset).unwrap();
            assert_eq!(loaded, graph);
            assert!(!loaded.is_dirty());
        }

        // No temporary files are left behind
        let leftovers = std::fs::read_dir(dir.path().join("dialogue"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_invalid_graph_does_not_round_trip() {
        let store = MemoryAssetStore::new();
        let asset = AssetRef::new("broken.joint");
        let graph = sample_graph();
        store.save(&graph, &asset).unwrap();

        // Point a root at a node that does not exist
        let text = store.raw(&asset).unwrap();
        let root = graph.roots()[0].to_string();
        let broken = text.replacen(&root, "00000000-0000-0000-0000-000000000000", 1);
        store.insert_raw(asset.clone(), broken);

        let err = store.load(&asset).unwrap_err();
        assert!(matches!(err, AssetError::CorruptAsset { .. }));
    }

    #[test]
    fn test_unparseable_asset_is_corrupt() {
        let store = MemoryAssetStore::new();
        let asset = AssetRef::new("garbage.json");
        store.insert_raw(asset.clone(), "{ not json");
        assert!(matches!(store.load(&asset), Err(AssetError::CorruptAsset { .. })));
    }

    #[test]
    fn test_missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path());
        assert!(matches!(
            store.load(&AssetRef::new("missing.joint")),
            Err(AssetError::NotFound(_))
        ));
        assert!(matches!(
            store.save(&JointGraph::default(), &AssetRef::new("graph.txt")),
            Err(AssetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_newer_version_rejected() {
        let store = MemoryAssetStore::new();
        let asset = AssetRef::new("future.json");
        let mut envelope = JointAsset::new(JointGraph::default());
        envelope.version = ASSET_FORMAT_VERSION + 1;
        store.insert_raw(asset.clone(), envelope.encode(AssetFormat::Json).unwrap());
        assert!(matches!(
            store.load(&asset),
            Err(AssetError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_asset_for_path() {
        let store = FileAssetStore::new("/assets");
        let asset = store.asset_for(Path::new("/assets/quests/intro.joint")).unwrap();
        assert_eq!(asset.as_str(), "quests/intro.joint");
        assert_eq!(asset.format().unwrap(), AssetFormat::Ron);
        assert!(store.asset_for(Path::new("/elsewhere/intro.joint")).is_none());
    }
}
