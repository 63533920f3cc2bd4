//! Workspace configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// File extension of entity and registry artifacts.
pub const ARTIFACT_EXTENSION: &str = "model";

/// Where a workspace keeps its artifacts and ledger, and how it names things.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Workspace root directory.
    pub root: PathBuf,

    /// Directory holding one entity artifact per model.
    pub entities_dir: PathBuf,

    /// Path of the registry artifact.
    pub registry_path: PathBuf,

    /// Directory of the sled database holding the change ledger.
    pub ledger_path: PathBuf,

    /// Namespace written into new entity artifacts.
    pub entity_namespace: String,

    /// Namespace of the registry artifact.
    pub registry_namespace: String,

    /// Name of the registry declaration.
    pub registry_name: String,

    /// Recorded as `modified_by` on ledger rows.
    pub actor: String,

    /// Window used by the recent-changes projection.
    pub recent_window: Duration,

    /// Page cache capacity of the ledger database in bytes.
    pub cache_capacity: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl WorkspaceConfig {
    /// Create a configuration rooted at `root` with default layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            entities_dir: root.join("Models"),
            registry_path: root.join("Data").join("Registry.model"),
            ledger_path: root.join(".modelforge"),
            root,
            entity_namespace: "App.Models".to_string(),
            registry_namespace: "App.Data".to_string(),
            registry_name: "AppRegistry".to_string(),
            actor: "system".to_string(),
            recent_window: Duration::from_secs(24 * 60 * 60),
            cache_capacity: 64 * 1024 * 1024, // 64MB
        }
    }

    /// Set the entities directory.
    pub fn with_entities_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.entities_dir = dir.into();
        self
    }

    /// Set the registry artifact path.
    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = path.into();
        self
    }

    /// Set the ledger database directory.
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Set the namespace of new entity artifacts.
    pub fn with_entity_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.entity_namespace = namespace.into();
        self
    }

    /// Set the registry namespace.
    pub fn with_registry_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.registry_namespace = namespace.into();
        self
    }

    /// Set the registry declaration name.
    pub fn with_registry_name(mut self, name: impl Into<String>) -> Self {
        self.registry_name = name.into();
        self
    }

    /// Set the actor recorded on ledger rows.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Set the recent-changes window.
    pub fn with_recent_window(mut self, window: Duration) -> Self {
        self.recent_window = window;
        self
    }

    /// Path of the entity artifact for `model`.
    pub fn entity_path(&self, model: &str) -> PathBuf {
        self.entities_dir
            .join(format!("{}.{}", model, ARTIFACT_EXTENSION))
    }

    /// Model name for an entity artifact path, if it is one.
    pub fn model_name_of(&self, path: &Path) -> Option<String> {
        if path.parent() != Some(self.entities_dir.as_path()) {
            return None;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
            return None;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.ledger_path)
            .cache_capacity(self.cache_capacity)
    }
}
