//! Harvest orchestrator.
//!
//! [`HarvestPipeline`] owns the ordered adapter list, selects the adapter for
//! a project and drives it through its lifecycle:
//! select → installed check → tool version → root → modules with deps → root
//! package. Every stage is awaited in turn; an optional per-stage deadline is
//! applied via `tokio::time::timeout` (none by default).

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::HarvestConfig;
use crate::harvest::graph::DependencyTree;
use crate::model::Package;
use crate::traits::{select_adapter, AdapterError, AdapterMetadata, EcosystemAdapter};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Complete harvest result for one project.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    /// Slug of the adapter that handled the project
    pub ecosystem: String,

    /// Version reported by the package manager (or interpreter)
    pub manager_version: String,

    /// The project itself; the sentinel package when none was found
    pub root: Package,

    /// Every package, with `children` ids indexing into this list
    pub modules: Vec<Package>,

    pub stats: HarvestStats,
}

impl HarvestResult {
    pub fn tree(&self) -> DependencyTree<'_> {
        DependencyTree::new(&self.modules)
    }
}

/// Statistics about the harvest operation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HarvestStats {
    /// Total time spent on the whole run (milliseconds)
    pub total_duration_ms: u64,

    /// Time spent loading modules and building the graph (milliseconds)
    pub load_duration_ms: u64,

    /// Number of packages returned
    pub modules: usize,

    /// Number of dependency edges attached
    pub edges: usize,

    /// Packages reachable from the root, root included
    pub reachable: usize,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("No adapter recognizes project at '{0}'")]
    NoAdapter(String),

    /// Stage execution exceeded timeout
    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: String, timeout_secs: u64 },

    #[error("Stage '{stage}' failed: {source}")]
    Adapter {
        stage: String,
        #[source]
        source: AdapterError,
    },
}

impl PipelineError {
    /// Packages collected before a partial adapter failure, if any.
    pub fn partial_modules(&self) -> Option<&[Package]> {
        match self {
            PipelineError::Adapter { source, .. } => source.partial_modules(),
            _ => None,
        }
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Sequential harvest run over an ordered adapter list.
///
/// Not shared between runs: adapters cache per-project state, so use one
/// pipeline per analysed project.
///
/// # Example
///
/// ```ignore
/// use dependency_harvester::harvest::formats::all_adapters;
/// use dependency_harvester::harvest::pipeline::HarvestPipeline;
/// use dependency_harvester::SystemCommandRunner;
/// use std::path::Path;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let runner = Arc::new(SystemCommandRunner::new());
///     let mut pipeline = HarvestPipeline::new(all_adapters(runner))
///         .with_timeout(Duration::from_secs(300));
///
///     let result = pipeline.execute(Path::new("."), None).await?;
///     println!("{} {} packages", result.ecosystem, result.stats.modules);
///     Ok(())
/// }
/// ```
pub struct HarvestPipeline {
    adapters: Vec<Box<dyn EcosystemAdapter>>,

    /// Index of the adapter matched by [`HarvestPipeline::select`]
    selected: Option<usize>,

    /// Deadline for each stage; `None` waits indefinitely
    stage_timeout: Option<Duration>,
}

impl HarvestPipeline {
    pub fn new(adapters: Vec<Box<dyn EcosystemAdapter>>) -> Self {
        Self {
            adapters,
            selected: None,
            stage_timeout: None,
        }
    }

    /// Sets the timeout for each pipeline stage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Applies the settings of a loaded [`HarvestConfig`].
    pub fn with_config(mut self, config: &HarvestConfig) -> Self {
        if let Some(timeout) = config.stage_timeout() {
            self.stage_timeout = Some(timeout);
        }
        self
    }

    /// Picks the first adapter that recognizes `path` and keeps it for the
    /// rest of the run.
    pub fn select(&mut self, path: &Path) -> Option<AdapterMetadata> {
        self.selected = select_adapter(&mut self.adapters, path);
        self.selected()
    }

    pub fn selected(&self) -> Option<AdapterMetadata> {
        self.selected
            .and_then(|i| self.adapters.get(i))
            .map(|a| a.metadata())
    }

    /// Runs the full lifecycle against `project`.
    ///
    /// `global_config` is handed through to the adapter's
    /// `list_modules_with_deps`.
    pub async fn execute(
        &mut self,
        project: &Path,
        global_config: Option<&Path>,
    ) -> Result<HarvestResult, PipelineError> {
        let start = Instant::now();
        let mut stats = HarvestStats::default();
        let limit = self.stage_timeout;

        let metadata = self
            .select(project)
            .ok_or_else(|| PipelineError::NoAdapter(project.display().to_string()))?;
        info!(ecosystem = %metadata.slug, project = %project.display(), "Adapter selected");

        let index = self
            .selected
            .ok_or_else(|| PipelineError::NoAdapter(project.display().to_string()))?;
        let adapter = &mut self.adapters[index];

        run_stage(
            "has_modules_installed",
            limit,
            adapter.has_modules_installed(project),
        )
        .await?;

        let manager_version = run_stage("get_version", limit, adapter.get_version()).await?;
        info!(ecosystem = %metadata.slug, version = %manager_version, "Package manager version");

        adapter
            .set_root_module(project)
            .map_err(|source| PipelineError::Adapter {
                stage: "set_root_module".to_string(),
                source,
            })?;

        let load_start = Instant::now();
        let modules = run_stage(
            "list_modules_with_deps",
            limit,
            adapter.list_modules_with_deps(project, global_config),
        )
        .await?;
        stats.load_duration_ms = load_start.elapsed().as_millis() as u64;

        let root = run_stage("get_root_module", limit, adapter.get_root_module(project)).await?;
        if root.is_sentinel() {
            warn!(ecosystem = %metadata.slug, "No root module identified");
        }

        let tree = DependencyTree::new(&modules);
        stats.modules = modules.len();
        stats.edges = tree.edge_count();
        stats.reachable = tree.reachable().len();
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            ecosystem = %metadata.slug,
            modules = stats.modules,
            edges = stats.edges,
            reachable = stats.reachable,
            duration_ms = stats.total_duration_ms,
            "Harvest completed"
        );

        Ok(HarvestResult {
            ecosystem: metadata.slug,
            manager_version,
            root,
            modules,
            stats,
        })
    }
}

async fn run_stage<T, F>(
    stage: &'static str,
    limit: Option<Duration>,
    future: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    let result = match limit {
        Some(limit) => timeout(limit, future)
            .await
            .map_err(|_| PipelineError::StageTimeout {
                stage: stage.to_string(),
                timeout_secs: limit.as_secs(),
            })?,
        None => future.await,
    };
    result.map_err(|source| PipelineError::Adapter {
        stage: stage.to_string(),
        source,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedRunner;
    use crate::harvest::formats::all_adapters;
    use crate::harvest::formats::npm::lockfile::ECOMMERCE_LOCK_V2;
    use crate::model::PackageId;
    use crate::traits::testing::StubAdapter;
    use std::fs;
    use std::sync::Arc;

    fn stub_with_tree(slug: &'static str) -> StubAdapter {
        let mut root = Package::new("app", "1.0.0");
        root.root = true;
        root.children.insert("lib".to_string(), PackageId(1));
        let mut stub = StubAdapter::new(slug, true);
        stub.modules = vec![root, Package::new("lib", "2.0.0"), Package::new("orphan", "0.1.0")];
        stub
    }

    #[tokio::test]
    async fn test_pipeline_execution() {
        let mut pipeline = HarvestPipeline::new(vec![
            Box::new(StubAdapter::new("skipped", false)),
            Box::new(stub_with_tree("stub")),
        ]);

        let result = pipeline.execute(Path::new("/project"), None).await.unwrap();
        assert_eq!(result.ecosystem, "stub");
        assert_eq!(result.manager_version, "1.0.0");
        assert_eq!(result.root.name, "app");
        assert_eq!(result.stats.modules, 3);
        assert_eq!(result.stats.edges, 1);
        assert_eq!(result.stats.reachable, 2);
        assert_eq!(pipeline.selected().map(|m| m.slug).as_deref(), Some("stub"));
    }

    #[tokio::test]
    async fn test_no_adapter() {
        let mut pipeline = HarvestPipeline::new(vec![Box::new(StubAdapter::new("none", false))]);
        assert!(matches!(
            pipeline.execute(Path::new("/project"), None).await,
            Err(PipelineError::NoAdapter(_))
        ));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let mut slow = stub_with_tree("slow");
        slow.version_delay = Some(Duration::from_secs(5));
        let mut pipeline =
            HarvestPipeline::new(vec![Box::new(slow)]).with_timeout(Duration::from_millis(20));

        match pipeline.execute(Path::new("/project"), None).await {
            Err(PipelineError::StageTimeout { stage, .. }) => assert_eq!(stage, "get_version"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_with_config_sets_timeout() {
        let config = HarvestConfig {
            stage_timeout_secs: Some(30),
            ..HarvestConfig::default()
        };
        let pipeline = HarvestPipeline::new(Vec::new()).with_config(&config);
        assert_eq!(pipeline.stage_timeout, Some(Duration::from_secs(30)));

        let untouched = HarvestPipeline::new(Vec::new()).with_config(&HarvestConfig::default());
        assert!(untouched.stage_timeout.is_none());
    }

    fn npm_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package-lock.json"), ECOMMERCE_LOCK_V2).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_npm_project_end_to_end() {
        let dir = npm_project();
        fs::create_dir_all(dir.path().join("node_modules/core-js")).unwrap();
        let runner = Arc::new(ScriptedRunner::new().respond("npm --version", "10.2.4\n"));

        let mut pipeline = HarvestPipeline::new(all_adapters(runner));
        let result = pipeline.execute(dir.path(), None).await.unwrap();

        assert_eq!(result.ecosystem, "npm");
        assert_eq!(result.manager_version, "10.2.4");
        assert_eq!(result.root.name, "e-commerce");
        assert_eq!(result.stats.modules, 7);
        assert_eq!(result.tree().root(), Some(PackageId(0)));
    }

    #[tokio::test]
    async fn test_adapter_failure_names_stage() {
        let dir = npm_project();
        let runner = Arc::new(ScriptedRunner::new());
        let mut pipeline = HarvestPipeline::new(all_adapters(runner));

        match pipeline.execute(dir.path(), None).await {
            Err(PipelineError::Adapter { stage, source }) => {
                assert_eq!(stage, "has_modules_installed");
                assert!(matches!(source, AdapterError::DependenciesNotInstalled(_)));
            }
            other => panic!("expected adapter error, got {other:?}"),
        }
    }
}
