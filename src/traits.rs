use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::ConfigError;
use crate::executor::CommandError;
use crate::harvest::formats::npm::lockfile::LockfileError;
use crate::harvest::graph::GraphError;
use crate::model::Package;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Cannot find the {0} command")]
    ToolNotFound(String),

    #[error("{0} version not found")]
    VersionNotFound(String),

    #[error("No modules or vendors found. Please install them first, e.g.: `{0}`")]
    DependenciesNotInstalled(String),

    #[error("Modules not found: {0}")]
    ModulesNotFound(String),

    #[error("Failed to convert modules: {0}")]
    ConversionFailed(String),

    #[error("No adapter selected; call is_valid first")]
    NotSelected,

    /// Loading or enrichment stopped partway; `modules` holds what was
    /// accumulated before the failure.
    #[error("{source} ({} modules collected before failure)", .modules.len())]
    Partial {
        modules: Vec<Package>,
        #[source]
        source: Box<AdapterError>,
    },

    #[error("Lock file error: {0}")]
    Lockfile(#[from] LockfileError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AdapterError {
    pub fn partial(modules: Vec<Package>, source: AdapterError) -> Self {
        AdapterError::Partial {
            modules,
            source: Box::new(source),
        }
    }

    /// Packages accumulated before a partial failure, if any.
    pub fn partial_modules(&self) -> Option<&[Package]> {
        match self {
            AdapterError::Partial { modules, .. } => Some(modules),
            _ => None,
        }
    }
}

/// Static description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterMetadata {
    /// Human-readable ecosystem name
    pub name: String,
    /// Short identifier (e.g. `"npm"`, `"poetry"`)
    pub slug: String,
    /// Files whose presence marks a project as belonging to this adapter
    pub manifest: Vec<String>,
    /// Directories holding installed modules
    pub module_path: Vec<String>,
}

impl AdapterMetadata {
    pub fn new(name: &str, slug: &str, manifest: &[&str], module_path: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            slug: slug.to_string(),
            manifest: manifest.iter().map(|m| m.to_string()).collect(),
            module_path: module_path.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Manifest files that exist under `path`.
    pub fn present_manifests(&self, path: &Path) -> Vec<PathBuf> {
        self.manifest
            .iter()
            .map(|m| path.join(m))
            .filter(|p| p.exists())
            .collect()
    }
}

/// Lifecycle contract of one package-manager integration.
///
/// An instance serves one analysis run. Operations called out of order
/// either compute lazily (`get_root_module` before a load triggers the load)
/// or work on empty state; none of them panic.
#[async_trait]
pub trait EcosystemAdapter: Send {
    fn metadata(&self) -> AdapterMetadata;

    /// Detects this adapter's artifacts under `path`. Only reads the filesystem.
    fn is_valid(&mut self, path: &Path) -> bool;

    /// Precondition check: fails with [`AdapterError::DependenciesNotInstalled`]
    /// when the tool reports nothing installed.
    async fn has_modules_installed(&mut self, path: &Path) -> Result<(), AdapterError>;

    /// Runtime version of the underlying tool.
    async fn get_version(&mut self) -> Result<String, AdapterError>;

    /// Records the project root for later calls. Idempotent.
    fn set_root_module(&mut self, path: &Path) -> Result<(), AdapterError>;

    /// The package marked `root`, or [`Package::sentinel`] when there is none.
    async fn get_root_module(&mut self, path: &Path) -> Result<Package, AdapterError>;

    /// Loads and enriches the flat package collection.
    ///
    /// On failure partway the error is [`AdapterError::Partial`] carrying the
    /// packages collected so far.
    async fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>, AdapterError>;

    /// Full pipeline: load, enrich, resolve root and attach dependency edges.
    async fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_config: Option<&Path>,
    ) -> Result<Vec<Package>, AdapterError>;
}

/// Tries each candidate in order and returns the index of the first whose
/// `is_valid` passes. Later candidates are not consulted once one matches.
pub fn select_adapter(candidates: &mut [Box<dyn EcosystemAdapter>], path: &Path) -> Option<usize> {
    for (index, candidate) in candidates.iter_mut().enumerate() {
        if candidate.is_valid(path) {
            debug!(adapter = %candidate.metadata().slug, "Adapter matched");
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Adapter that matches a fixed answer and counts validity probes.
    pub(crate) struct StubAdapter {
        pub(crate) slug: &'static str,
        pub(crate) valid: bool,
        pub(crate) probes: Arc<AtomicUsize>,
        pub(crate) modules: Vec<Package>,
        pub(crate) version_delay: Option<Duration>,
    }

    impl StubAdapter {
        pub(crate) fn new(slug: &'static str, valid: bool) -> Self {
            Self {
                slug,
                valid,
                probes: Arc::new(AtomicUsize::new(0)),
                modules: Vec::new(),
                version_delay: None,
            }
        }
    }

    #[async_trait]
    impl EcosystemAdapter for StubAdapter {
        fn metadata(&self) -> AdapterMetadata {
            AdapterMetadata::new(self.slug, self.slug, &[], &[])
        }

        fn is_valid(&mut self, _path: &Path) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.valid
        }

        async fn has_modules_installed(&mut self, _path: &Path) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn get_version(&mut self) -> Result<String, AdapterError> {
            if let Some(delay) = self.version_delay {
                tokio::time::sleep(delay).await;
            }
            Ok("1.0.0".to_string())
        }

        fn set_root_module(&mut self, _path: &Path) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn get_root_module(&mut self, _path: &Path) -> Result<Package, AdapterError> {
            Ok(self
                .modules
                .iter()
                .find(|m| m.root)
                .cloned()
                .unwrap_or_else(Package::sentinel))
        }

        async fn list_used_modules(&mut self, _path: &Path) -> Result<Vec<Package>, AdapterError> {
            Ok(self.modules.clone())
        }

        async fn list_modules_with_deps(
            &mut self,
            _path: &Path,
            _global_config: Option<&Path>,
        ) -> Result<Vec<Package>, AdapterError> {
            Ok(self.modules.clone())
        }
    }
}
