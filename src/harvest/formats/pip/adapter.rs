//! Adapter shared by every Python environment manager. The tool decides which
//! commands run; listing, metadata decoding and graph assembly are common.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::executor::{CommandError, CommandOptions, CommandRunner};
use crate::harvest::formats::pip::tool::PythonTool;
use crate::harvest::formats::pip::worker::{
    is_requirement_meet, load_modules, mark_root_module, short_python_version, MetadataDecoder,
};
use crate::harvest::graph::build_dependency_graph;
use crate::harvest::traits::{AdapterState, Lifecycle};
use crate::model::Package;
use crate::traits::{AdapterError, AdapterMetadata, EcosystemAdapter};

const LANGUAGE: &str = "Python";

pub struct PythonAdapter {
    tool: PythonTool,
    runner: Arc<dyn CommandRunner>,
    state: AdapterState,
    python_version: Option<String>,
}

impl PythonAdapter {
    pub fn new(tool: PythonTool, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tool,
            runner,
            state: AdapterState::new(),
            python_version: None,
        }
    }

    pub fn tool(&self) -> PythonTool {
        self.tool
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    /// Interpreter tag such as `python3.11`, known after `get_version`.
    pub fn python_version(&self) -> Option<&str> {
        self.python_version.as_deref()
    }

    async fn run(&self, command: &CommandOptions) -> Result<String, AdapterError> {
        self.runner.output(command).await.map_err(|e| match e {
            CommandError::NotFound { .. } => {
                AdapterError::ToolNotFound(self.tool.slug().to_string())
            }
            other => AdapterError::Command(other),
        })
    }

    async fn load(&mut self, path: &Path) -> Result<(), AdapterError> {
        let base = self.state.base_path_or(path);
        self.state.reset_modules();

        if let Some(install) = self.tool.install_root_command(&base) {
            if let Err(err) = self.runner.output(&install).await {
                warn!(
                    tool = self.tool.slug(),
                    error = %err,
                    "Could not install root module into environment"
                );
            }
        }

        let output = self.run(&self.tool.modules_command(&base)).await?;
        if !is_requirement_meet(&output) {
            return Err(AdapterError::ModulesNotFound(format!(
                "run `{}` first",
                self.tool.install_hint()
            )));
        }
        let mut pkgs = load_modules(&output)?;
        if mark_root_module(&mut pkgs, &base).is_none() {
            debug!(tool = self.tool.slug(), "No installed entry matches the project");
        }

        let decoder = MetadataDecoder::new(self.runner.as_ref(), self.tool.metadata_command(&base));
        let mut modules = Vec::with_capacity(pkgs.len());
        match decoder.convert_metadata_to_modules(&pkgs, &mut modules).await {
            Ok(metainfo) => {
                info!(tool = self.tool.slug(), modules = modules.len(), "Loaded Python modules");
                self.state.modules = modules;
                self.state.mark_loaded(metainfo);
                Ok(())
            }
            Err(err) => {
                self.state.modules = modules.clone();
                Err(AdapterError::partial(modules, err))
            }
        }
    }
}

#[async_trait]
impl EcosystemAdapter for PythonAdapter {
    fn metadata(&self) -> AdapterMetadata {
        self.tool.metadata()
    }

    fn is_valid(&mut self, path: &Path) -> bool {
        let valid = !self.tool.metadata().present_manifests(path).is_empty();
        if valid {
            self.state.advance(Lifecycle::Validated);
        }
        valid
    }

    async fn has_modules_installed(&mut self, path: &Path) -> Result<(), AdapterError> {
        let base = self.state.base_path_or(path);
        let not_installed =
            || AdapterError::DependenciesNotInstalled(self.tool.install_hint().to_string());
        match self.run(&self.tool.modules_command(&base)).await {
            Ok(output) if is_requirement_meet(&output) => Ok(()),
            Ok(_) => Err(not_installed()),
            Err(err @ AdapterError::ToolNotFound(_)) => Err(err),
            Err(err) => {
                debug!(error = %err, "Module listing failed");
                Err(not_installed())
            }
        }
    }

    async fn get_version(&mut self) -> Result<String, AdapterError> {
        let base = self.state.base_path_or(&std::env::temp_dir());
        let output = self
            .runner
            .output(&self.tool.version_command(&base))
            .await
            .map_err(|e| {
                debug!(error = %e, "Python version query failed");
                AdapterError::VersionNotFound(LANGUAGE.to_string())
            })?;

        let version = output.trim().trim_start_matches(LANGUAGE).trim().to_string();
        if version.is_empty() {
            return Err(AdapterError::VersionNotFound(LANGUAGE.to_string()));
        }
        self.python_version = Some(short_python_version(&output));
        self.state.version = Some(version.clone());
        Ok(version)
    }

    fn set_root_module(&mut self, path: &Path) -> Result<(), AdapterError> {
        self.state.set_base_path(path);
        Ok(())
    }

    async fn get_root_module(&mut self, path: &Path) -> Result<Package, AdapterError> {
        if !self.state.loaded {
            self.load(path).await?;
        }
        Ok(self.state.root_module())
    }

    async fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>, AdapterError> {
        if !self.state.loaded {
            self.load(path).await?;
        }
        Ok(self.state.modules.clone())
    }

    async fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_config: Option<&Path>,
    ) -> Result<Vec<Package>, AdapterError> {
        if let Some(config) = global_config {
            debug!(config = %config.display(), "Global config is not used by Python adapters");
        }

        let mut modules = self.list_used_modules(path).await?;
        let root = self.get_root_module(path).await?;
        if root.is_sentinel() {
            warn!(tool = self.tool.slug(), "No root module found in environment");
        }

        build_dependency_graph(&mut modules, self.state.metainfo.as_ref())?;
        self.state.advance(Lifecycle::GraphBuilt);
        Ok(modules)
    }
}

// ============================================================================
// Tests
// ============================================================================
