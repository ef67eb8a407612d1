// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime settings stored as RON.

use crate::execution::ExecutionConfig;
use crate::search::SearchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Engine and search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointSettings {
    /// Format version
    pub version: u32,
    /// Execution limits
    pub execution: ExecutionConfig,
    /// Search ranking
    pub search: SearchConfig,
}

impl Default for JointSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            execution: ExecutionConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl JointSettings {
    /// Serialize to a RON string
    pub fn to_ron(&self) -> Result<String, SettingsError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        ron::ser::to_string_pretty(self, config).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Deserialize from a RON string
    pub fn from_ron(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = ron::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }
        Ok(settings)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Load settings, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

/// Settings error
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Malformed settings
    #[error("Failed to parse settings: {0}")]
    Parse(String),

    /// Written by a newer version
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Stored version
        found: u32,
        /// Newest readable version
        supported: u32,
    },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
