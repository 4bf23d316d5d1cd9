//! Per-adapter state and the metadata records adapters hand to the graph
//! builder.
//!
//! Every adapter keeps its mutable cache (project root, tool version, loaded
//! packages, declared dependencies, resolved root) in one [`AdapterState`]
//! with an explicit `loaded` flag, so the lifecycle can be driven and
//! inspected in isolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Package;

// ============================================================================
// Metadata
// ============================================================================

/// Declared information about one package name, as needed to attach edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,

    /// Preferred (hoisted/installed) version for this name
    pub version: String,

    /// Names of direct dependencies, in declaration order
    pub dependencies: Vec<String>,
}

impl ModuleMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Adds dependency names not already declared.
    pub fn merge_dependencies<'a, I>(&mut self, dependencies: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for dep in dependencies {
            if !self.dependencies.contains(dep) {
                self.dependencies.push(dep.clone());
            }
        }
    }
}

/// Mapping from package name to its declared metadata.
pub type MetadataMap = HashMap<String, ModuleMetadata>;

// ============================================================================
// Lifecycle
// ============================================================================

/// Where an adapter instance is in its lifecycle.
///
/// Stages only move forward; calls made out of order compute lazily instead
/// of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Validated,
    RootSet,
    Loaded,
    GraphBuilt,
}

/// Mutable cache owned by a single adapter instance.
///
/// Not meant to be shared: one adapter, one analysis run.
#[derive(Debug, Default)]
pub struct AdapterState {
    pub stage: Lifecycle,
    pub base_path: Option<PathBuf>,
    pub version: Option<String>,
    pub modules: Vec<Package>,
    pub metainfo: Option<MetadataMap>,
    pub loaded: bool,
    root: Option<Package>,
}

impl AdapterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, stage: Lifecycle) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    pub fn set_base_path(&mut self, path: &Path) {
        self.base_path = Some(path.to_path_buf());
        self.advance(Lifecycle::RootSet);
    }

    /// The recorded project root, or `fallback` when none was set.
    pub fn base_path_or(&self, fallback: &Path) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }

    /// Drops any previously loaded or partially loaded data.
    pub fn reset_modules(&mut self) {
        self.modules.clear();
        self.metainfo = None;
        self.loaded = false;
        self.root = None;
    }

    pub fn mark_loaded(&mut self, metainfo: MetadataMap) {
        self.metainfo = Some(metainfo);
        self.loaded = true;
        self.root = None;
        self.advance(Lifecycle::Loaded);
    }

    /// The cached root package, computed from `modules` on first call after
    /// a load. Returns the sentinel package when no module is marked root.
    pub fn root_module(&mut self) -> Package {
        if let Some(root) = &self.root {
            return root.clone();
        }
        let root = self
            .modules
            .iter()
            .find(|m| m.root)
            .cloned()
            .unwrap_or_else(Package::sentinel);
        if self.loaded {
            self.root = Some(root.clone());
        }
        root
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_only_moves_forward() {
        let mut state = AdapterState::new();
        state.advance(Lifecycle::Loaded);
        state.advance(Lifecycle::Validated);
        assert_eq!(state.stage, Lifecycle::Loaded);
    }

    #[test]
    fn test_set_base_path_is_idempotent() {
        let mut state = AdapterState::new();
        state.set_base_path(Path::new("/project"));
        state.set_base_path(Path::new("/project"));
        assert_eq!(state.stage, Lifecycle::RootSet);
        assert_eq!(state.base_path_or(Path::new("/other")), PathBuf::from("/project"));
    }

    #[test]
    fn test_root_module_sentinel_when_missing() {
        let mut state = AdapterState::new();
        state.modules.push(Package::new("lib", "1.0.0"));
        state.mark_loaded(MetadataMap::new());
        assert!(state.root_module().is_sentinel());
    }

    #[test]
    fn test_root_module_is_cached_after_load() {
        let mut state = AdapterState::new();
        let mut root = Package::new("app", "0.1.0");
        root.root = true;
        state.modules.push(root);
        state.mark_loaded(MetadataMap::new());

        assert_eq!(state.root_module().name, "app");
        state.modules.clear();
        assert_eq!(state.root_module().name, "app");

        state.reset_modules();
        assert!(state.root_module().is_sentinel());
    }

    #[test]
    fn test_merge_dependencies_deduplicates() {
        let mut meta = ModuleMetadata::new("a", "1.0.0").with_dependencies(["b", "c"]);
        meta.merge_dependencies(&["c".to_string(), "d".to_string()]);
        assert_eq!(meta.dependencies, vec!["b", "c", "d"]);
    }
}
