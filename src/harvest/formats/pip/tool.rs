use std::path::{Path, PathBuf};

use crate::executor::CommandOptions;
use crate::harvest::formats::pip::worker::PACKAGE_PLACEHOLDER;
use crate::traits::AdapterMetadata;

const PYPI_NAME: &str = "The Python Package Index (PyPI)";

/// Python environment managers, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonTool {
    Pipenv,
    Poetry,
    /// Plain interpreter or virtualenv driven through `python -m pip`
    Pyenv,
}

impl PythonTool {
    pub const ALL: [PythonTool; 3] = [PythonTool::Pipenv, PythonTool::Poetry, PythonTool::Pyenv];

    pub fn slug(&self) -> &'static str {
        match self {
            PythonTool::Pipenv => "pipenv",
            PythonTool::Poetry => "poetry",
            PythonTool::Pyenv => "pyenv",
        }
    }

    pub fn manifests(&self) -> &'static [&'static str] {
        match self {
            PythonTool::Pipenv => &["Pipfile.lock"],
            PythonTool::Poetry => &["poetry.lock"],
            PythonTool::Pyenv => &["requirements.txt", "setup.py", "pyproject.toml"],
        }
    }

    pub fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata::new(PYPI_NAME, self.slug(), self.manifests(), &[])
    }

    /// Command the user should run when nothing is installed.
    pub fn install_hint(&self) -> &'static str {
        match self {
            PythonTool::Pipenv => "pipenv install",
            PythonTool::Poetry => "poetry install",
            PythonTool::Pyenv => "pip install -r requirements.txt",
        }
    }

    /// Interpreter used by `pyenv`: the project's virtualenv if present.
    fn interpreter(base: &Path) -> String {
        [".venv", "venv"]
            .iter()
            .map(|dir| base.join(dir).join("bin").join("python"))
            .find(|p| p.exists())
            .map(|p: PathBuf| p.display().to_string())
            .unwrap_or_else(|| "python3".to_string())
    }

    fn python(&self, base: &Path, python_args: &[&str]) -> CommandOptions {
        match self {
            PythonTool::Pipenv | PythonTool::Poetry => CommandOptions::new(
                self.slug(),
                ["run", "python"].iter().chain(python_args).copied(),
                base,
            ),
            PythonTool::Pyenv => {
                CommandOptions::new(Self::interpreter(base), python_args.iter().copied(), base)
            }
        }
    }

    pub fn version_command(&self, base: &Path) -> CommandOptions {
        self.python(base, &["--version"])
    }

    pub fn modules_command(&self, base: &Path) -> CommandOptions {
        self.pip(base, &["list", "-v", "--format", "json"])
    }

    /// `pip show` with a `{PACKAGE}` placeholder.
    pub fn metadata_command(&self, base: &Path) -> CommandOptions {
        self.pip(base, &["show", PACKAGE_PLACEHOLDER])
    }

    /// Installs the project itself into its environment so `pip` can see it.
    pub fn install_root_command(&self, base: &Path) -> Option<CommandOptions> {
        match self {
            PythonTool::Poetry => Some(CommandOptions::new("poetry", ["install"], base)),
            PythonTool::Pipenv | PythonTool::Pyenv => None,
        }
    }

    fn pip(&self, base: &Path, pip_args: &[&str]) -> CommandOptions {
        match self {
            PythonTool::Pipenv | PythonTool::Poetry => CommandOptions::new(
                self.slug(),
                ["run", "pip"].iter().chain(pip_args).copied(),
                base,
            ),
            PythonTool::Pyenv => CommandOptions::new(
                Self::interpreter(base),
                ["-m", "pip"].iter().chain(pip_args).copied(),
                base,
            ),
        }
    }
}
