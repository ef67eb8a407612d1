// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem watcher for Joint assets.
//!
//! Emits debounced events for `.joint` and `.json` files so open documents
//! can reload when an asset changes on disk.

use joint::asset::{JSON_EXTENSION, RON_EXTENSION};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

/// Events emitted by the asset watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEvent {
    /// An asset was created
    Created(PathBuf),
    /// An asset was modified
    Modified(PathBuf),
    /// An asset was deleted
    Deleted(PathBuf),
    /// The watcher reported an error
    Error(String),
}

impl AssetEvent {
    /// Path the event refers to
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Deleted(path) => Some(path),
            Self::Error(_) => None,
        }
    }
}

/// Configuration for the asset watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for events
    pub debounce: Duration,
    /// Whether to watch directories recursively
    pub recursive: bool,
    /// Extensions to report, lower case without the dot
    pub extensions: HashSet<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            recursive: true,
            extensions: [RON_EXTENSION, JSON_EXTENSION].into_iter().map(String::from).collect(),
        }
    }
}

impl WatcherConfig {
    /// Whether events for `path` should be reported
    pub fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }
}

/// Debounced watcher over asset directories
pub struct AssetWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    event_rx: Receiver<AssetEvent>,
    watched_dirs: HashSet<PathBuf>,
    config: WatcherConfig,
}

impl AssetWatcher {
    /// Create a new watcher with the given configuration
    pub fn new(config: WatcherConfig) -> Result<Self, notify::Error> {
        let (event_tx, event_rx) = mpsc::channel();
        let filter = config.clone();

        let debouncer = new_debouncer(config.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for path in event.paths.iter().filter(|p| filter.accepts(p)) {
                            let mapped = match event.kind {
                                EventKind::Create(_) => AssetEvent::Created(path.clone()),
                                EventKind::Modify(_) => AssetEvent::Modified(path.clone()),
                                EventKind::Remove(_) => AssetEvent::Deleted(path.clone()),
                                EventKind::Any | EventKind::Access(_) | EventKind::Other => continue,
                            };
                            let _ = event_tx.send(mapped);
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        let _ = event_tx.send(AssetEvent::Error(error.to_string()));
                    }
                }
            }
        })?;

        Ok(Self {
            debouncer,
            event_rx,
            watched_dirs: HashSet::new(),
            config,
        })
    }

    /// Watch a directory for changes
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<(), notify::Error> {
        let path = path.as_ref().to_path_buf();
        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.debouncer.watch(&path, mode)?;
        tracing::info!(path = %path.display(), "Watching asset directory");
        self.watched_dirs.insert(path);
        Ok(())
    }

    /// Stop watching a directory
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<(), notify::Error> {
        let path = path.as_ref();
        self.debouncer.unwatch(path)?;
        self.watched_dirs.remove(path);
        tracing::info!(path = %path.display(), "Stopped watching asset directory");
        Ok(())
    }

    /// Check if a directory is being watched
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_dirs.contains(path)
    }

    /// Poll for pending events (non-blocking)
    pub fn poll_events(&self) -> Vec<AssetEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("Asset watcher channel disconnected");
                    break;
                }
            }
        }
        events
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_event(&self, timeout: Duration) -> Option<AssetEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Get configuration
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }
}

/// Collapse a batch of events into the set of assets needing a reload
pub fn changed_assets(events: &[AssetEvent]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| matches!(e, AssetEvent::Created(_) | AssetEvent::Modified(_)))
        .filter_map(AssetEvent::path)
        .filter(|p| seen.insert(p.to_path_buf()))
        .map(Path::to_path_buf)
        .collect()
}
