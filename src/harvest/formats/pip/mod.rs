//! Python support: one [`Pip`] entry point over the pipenv, poetry and plain
//! interpreter environments.

pub mod adapter;
pub mod tool;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::CommandRunner;
use crate::model::Package;
use crate::traits::{select_adapter, AdapterError, AdapterMetadata, EcosystemAdapter};

pub use adapter::PythonAdapter;
pub use tool::PythonTool;

/// Tries each Python environment manager in order and sticks with the first
/// whose manifest is present.
pub struct Pip {
    candidates: Vec<Box<dyn EcosystemAdapter>>,
    selected: Option<usize>,
}

impl Pip {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let candidates = PythonTool::ALL
            .iter()
            .map(|tool| {
                Box::new(PythonAdapter::new(*tool, runner.clone())) as Box<dyn EcosystemAdapter>
            })
            .collect();
        Self::with_candidates(candidates)
    }

    pub(crate) fn with_candidates(candidates: Vec<Box<dyn EcosystemAdapter>>) -> Self {
        Self {
            candidates,
            selected: None,
        }
    }

    /// Slug of the matched manager, once `is_valid` succeeded.
    pub fn selected(&self) -> Option<String> {
        self.selected
            .and_then(|i| self.candidates.get(i))
            .map(|c| c.metadata().slug)
    }

    fn current(&mut self) -> Result<&mut Box<dyn EcosystemAdapter>, AdapterError> {
        self.selected
            .and_then(|i| self.candidates.get_mut(i))
            .ok_or(AdapterError::NotSelected)
    }
}

#[async_trait]
impl EcosystemAdapter for Pip {
    fn metadata(&self) -> AdapterMetadata {
        match self.selected.and_then(|i| self.candidates.get(i)) {
            Some(adapter) => adapter.metadata(),
            None => AdapterMetadata::new("The Python Package Index (PyPI)", "pip", &[], &[]),
        }
    }

    fn is_valid(&mut self, path: &Path) -> bool {
        self.selected = select_adapter(&mut self.candidates, path);
        self.selected.is_some()
    }

    async fn has_modules_installed(&mut self, path: &Path) -> Result<(), AdapterError> {
        self.current()?.has_modules_installed(path).await
    }

    async fn get_version(&mut self) -> Result<String, AdapterError> {
        self.current()?.get_version().await
    }

    fn set_root_module(&mut self, path: &Path) -> Result<(), AdapterError> {
        self.current()?.set_root_module(path)
    }

    async fn get_root_module(&mut self, path: &Path) -> Result<Package, AdapterError> {
        self.current()?.get_root_module(path).await
    }

    async fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>, AdapterError> {
        self.current()?.list_used_modules(path).await
    }

    async fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_config: Option<&Path>,
    ) -> Result<Vec<Package>, AdapterError> {
        self.current()?
            .list_modules_with_deps(path, global_config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedRunner;
    use crate::traits::testing::StubAdapter;
    use std::fs;
    use std::sync::atomic::Ordering;

    fn pip() -> Pip {
        Pip::new(Arc::new(ScriptedRunner::new()))
    }

    #[test]
    fn test_pipenv_wins_over_poetry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Pipfile.lock"), "{}").unwrap();
        fs::write(dir.path().join("poetry.lock"), "").unwrap();

        let mut pip = pip();
        assert!(pip.is_valid(dir.path()));
        assert_eq!(pip.selected().as_deref(), Some("pipenv"));
        assert_eq!(pip.metadata().slug, "pipenv");
    }

    #[test]
    fn test_requirements_selects_pyenv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "requests==2.31.0\n").unwrap();

        let mut pip = pip();
        assert!(pip.is_valid(dir.path()));
        assert_eq!(pip.selected().as_deref(), Some("pyenv"));
    }

    #[test]
    fn test_no_manifest_selects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pip = pip();
        assert!(!pip.is_valid(dir.path()));
        assert_eq!(pip.metadata().slug, "pip");
    }

    #[tokio::test]
    async fn test_calls_before_selection_fail() {
        let mut pip = pip();
        assert!(matches!(pip.get_version().await, Err(AdapterError::NotSelected)));
        assert!(matches!(
            pip.list_used_modules(Path::new("/project")).await,
            Err(AdapterError::NotSelected)
        ));
        assert!(pip.set_root_module(Path::new("/project")).is_err());
    }

    #[tokio::test]
    async fn test_later_candidates_not_probed_after_match() {
        let last = StubAdapter::new("last", true);
        let probes = last.probes.clone();
        let mut pip = Pip::with_candidates(vec![
            Box::new(StubAdapter::new("first", true)),
            Box::new(last),
        ]);

        assert!(pip.is_valid(Path::new("/project")));
        assert_eq!(probes.load(Ordering::SeqCst), 0);
        assert_eq!(pip.get_version().await.unwrap(), "1.0.0");
        assert_eq!(pip.selected().as_deref(), Some("first"));
    }
}
