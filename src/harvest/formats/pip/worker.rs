//! Parsing of `pip list` / `pip show` output and conversion into packages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::executor::{CommandOptions, CommandRunner};
use crate::harvest::traits::{MetadataMap, ModuleMetadata};
use crate::model::{Checksum, HashAlgorithm, Package, Supplier, SupplierType};
use crate::traits::AdapterError;

/// One entry of `pip list -v --format json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub installer: String,
    #[serde(default)]
    pub editable_project_location: Option<String>,
    #[serde(skip)]
    pub root: bool,
}

/// Fields of `pip show <package>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipMetadata {
    pub name: String,
    pub version: String,
    pub summary: String,
    pub home_page: String,
    pub author: String,
    pub author_email: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub license: String,
    pub location: String,
    pub requires: Vec<String>,
}

/// Decodes module list output. Malformed output is `ModulesNotFound`.
pub fn load_modules(output: &str) -> Result<Vec<InstalledPackage>, AdapterError> {
    serde_json::from_str(output.trim())
        .map_err(|e| AdapterError::ModulesNotFound(format!("unreadable module list: {e}")))
}

/// True when the module list output is readable and names at least one package.
pub fn is_requirement_meet(output: &str) -> bool {
    load_modules(output).map(|m| !m.is_empty()).unwrap_or(false)
}

/// `"Python 3.9.1"` becomes `"python3.9"`.
pub fn short_python_version(output: &str) -> String {
    let version = output.trim().trim_start_matches("Python").trim();
    let mut parts = version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("python{major}.{minor}"),
        (Some(major), None) if !major.is_empty() => format!("python{major}"),
        _ => "python".to_string(),
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Candidate for the project itself: an editable install located inside the
/// project, or an entry installed without an installer.
pub fn is_root_module(pkg: &InstalledPackage, base_path: &Path) -> bool {
    match &pkg.editable_project_location {
        Some(location) => canonical(Path::new(location)).starts_with(canonical(base_path)),
        None => pkg.installer.is_empty(),
    }
}

/// Flags exactly one entry as root and returns its index.
///
/// An editable install inside the project wins; otherwise the first
/// candidate in list order. Every other entry is cleared.
pub fn mark_root_module(pkgs: &mut [InstalledPackage], base_path: &Path) -> Option<usize> {
    let index = pkgs
        .iter()
        .position(|p| p.editable_project_location.is_some() && is_root_module(p, base_path))
        .or_else(|| pkgs.iter().position(|p| is_root_module(p, base_path)));
    for (i, pkg) in pkgs.iter_mut().enumerate() {
        pkg.root = Some(i) == index;
    }
    index
}

/// PEP 503 name normalization.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_dash {
                normalized.push('-');
            }
            last_dash = true;
        } else {
            normalized.extend(c.to_lowercase());
            last_dash = false;
        }
    }
    normalized
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `Key: value` lines of `pip show`. Unknown keys are ignored.
pub fn parse_metadata(output: &str) -> PipMetadata {
    let mut meta = PipMetadata::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Name" => meta.name = value.to_string(),
            "Version" => meta.version = value.to_string(),
            "Summary" => meta.summary = value.to_string(),
            "Home-page" => meta.home_page = value.to_string(),
            "Author" => meta.author = value.to_string(),
            "Author-email" => meta.author_email = value.to_string(),
            "Maintainer" => meta.maintainer = value.to_string(),
            "Maintainer-email" => meta.maintainer_email = value.to_string(),
            "License" => meta.license = value.to_string(),
            "Location" => meta.location = value.to_string(),
            "Requires" => meta.requires = split_list(value),
            _ => {}
        }
    }
    meta
}

fn supplier_for(meta: &PipMetadata) -> Supplier {
    if !meta.author.is_empty() {
        Supplier::new(SupplierType::Person, meta.author.clone(), meta.author_email.clone())
    } else if !meta.maintainer.is_empty() {
        Supplier::new(
            SupplierType::Organization,
            meta.maintainer.clone(),
            meta.maintainer_email.clone(),
        )
    } else {
        Supplier::default()
    }
}

/// Builds the canonical package for an installed module and its metadata.
pub fn convert_to_package(pkg: &InstalledPackage, meta: &PipMetadata) -> Package {
    let version = if meta.version.is_empty() {
        pkg.version.clone()
    } else {
        meta.version.clone()
    };
    let location = if meta.location.is_empty() {
        &pkg.location
    } else {
        &meta.location
    };

    let mut package = Package::new(pkg.name.clone(), version.clone());
    package.root = pkg.root;
    package.local_path = if location.is_empty() {
        String::new()
    } else {
        Path::new(location).join(&pkg.name).display().to_string()
    };
    package.package_url = format!("pkg:pypi/{}@{}", normalize_name(&pkg.name), version);
    package.download_location = format!("https://pypi.org/project/{}/{}", pkg.name, version);
    package.home_page = meta.home_page.clone();
    package.license_declared = meta.license.clone();
    package.comment = meta.summary.clone();
    package.supplier = supplier_for(meta);
    package.checksum = Checksum::new(HashAlgorithm::Sha256, format!("{}-{}", pkg.name, version));
    package
}

/// Fetches `pip show` output per package and converts modules.
pub struct MetadataDecoder<'a> {
    runner: &'a dyn CommandRunner,
    /// Command line with a `{PACKAGE}` placeholder in one argument
    template: CommandOptions,
}

pub const PACKAGE_PLACEHOLDER: &str = "{PACKAGE}";

impl<'a> MetadataDecoder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, template: CommandOptions) -> Self {
        Self { runner, template }
    }

    pub async fn package_details(&self, package_name: &str) -> Result<String, AdapterError> {
        let mut command = self.template.clone();
        for arg in &mut command.args {
            *arg = arg.replace(PACKAGE_PLACEHOLDER, package_name);
        }
        Ok(self.runner.output(&command).await?)
    }

    /// Converts every installed package, appending to `modules` as it goes.
    ///
    /// On the first failure, `modules` keeps what was converted so far and
    /// the error is returned.
    pub async fn convert_metadata_to_modules(
        &self,
        pkgs: &[InstalledPackage],
        modules: &mut Vec<Package>,
    ) -> Result<MetadataMap, AdapterError> {
        let mut details = Vec::with_capacity(pkgs.len());
        for pkg in pkgs {
            let output = self.package_details(&pkg.name).await.map_err(|e| {
                warn!(package = %pkg.name, error = %e, "Failed to fetch package metadata");
                AdapterError::ConversionFailed(format!("{}: {}", pkg.name, e))
            })?;
            let meta = parse_metadata(&output);
            modules.push(convert_to_package(pkg, &meta));
            details.push(meta);
        }

        // Requires lists use the distribution's declared spelling; map them
        // onto installed names so edges match exactly.
        let installed: HashMap<String, &str> = pkgs
            .iter()
            .map(|p| (normalize_name(&p.name), p.name.as_str()))
            .collect();

        let mut metainfo = MetadataMap::new();
        for (pkg, meta) in pkgs.iter().zip(&details) {
            let dependencies = meta
                .requires
                .iter()
                .map(|r| {
                    installed
                        .get(&normalize_name(r))
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| r.clone())
                })
                .collect::<Vec<_>>();
            metainfo.insert(
                pkg.name.clone(),
                ModuleMetadata::new(pkg.name.clone(), pkg.version.clone())
                    .with_dependencies(dependencies),
            );
        }
        debug!(modules = modules.len(), "Converted module metadata");
        Ok(metainfo)
    }
}

// ============================================================================
// Tests
// ============================================================================
