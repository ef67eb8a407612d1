// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor preferences.

use crate::history::MAX_HISTORY;
use crate::watcher::WatcherConfig;
use joint::asset::{JSON_EXTENSION, RON_EXTENSION};
use joint::JointSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Current editor settings format version
pub const EDITOR_SETTINGS_VERSION: u32 = 1;

/// Editor settings, stored as RON next to the runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    /// Format version
    pub version: u32,
    /// Undo depth per document
    pub history_depth: usize,
    /// Asset watcher debounce in milliseconds
    pub watch_debounce_ms: u64,
    /// Extensions reported by the asset watcher
    pub asset_extensions: Vec<String>,
    /// Runtime settings used by play sessions and search
    pub runtime: JointSettings,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            version: EDITOR_SETTINGS_VERSION,
            history_depth: MAX_HISTORY,
            watch_debounce_ms: 250,
            asset_extensions: vec![RON_EXTENSION.to_string(), JSON_EXTENSION.to_string()],
            runtime: JointSettings::default(),
        }
    }
}

impl EditorSettings {
    /// Serialize to a RON string
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        ron::ser::to_string_pretty(self, config)
    }

    /// Deserialize from a RON string
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_ron(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        if settings.version > EDITOR_SETTINGS_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Editor settings version {} is newer than supported version {}",
                    settings.version, EDITOR_SETTINGS_VERSION
                ),
            ));
        }
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = self
            .to_ron()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Watcher configuration described by these settings
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(self.watch_debounce_ms),
            extensions: self.asset_extensions.iter().map(|e| e.to_lowercase()).collect(),
            ..WatcherConfig::default()
        }
    }
}
