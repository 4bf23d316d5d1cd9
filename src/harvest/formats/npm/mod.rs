//! npm adapter: packages come from `package-lock.json`, enriched from the
//! installed `node_modules/<pkg>/package.json` when present.

pub mod lockfile;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::executor::{CommandOptions, CommandRunner};
use crate::harvest::graph::build_dependency_graph;
use crate::harvest::traits::{AdapterState, Lifecycle, MetadataMap, ModuleMetadata};
use crate::model::{Checksum, HashAlgorithm, Package, Supplier, SupplierType};
use crate::traits::{AdapterError, AdapterMetadata, EcosystemAdapter};

use lockfile::{
    package_name_from_key, parse_manifest, read_manifest, LicenseField, LockPackage, PackageLock,
};

const CMD_NAME: &str = "npm";
const MANIFEST_FILE: &str = "package.json";
const LOCK_FILE: &str = "package-lock.json";
const MODULES_DIR: &str = "node_modules";
const REGISTRY_URL: &str = "https://registry.npmjs.org";

pub struct NpmAdapter {
    metadata: AdapterMetadata,
    runner: Arc<dyn CommandRunner>,
    state: AdapterState,
}

impl NpmAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            metadata: AdapterMetadata::new(
                "Node Package Manager",
                CMD_NAME,
                &[MANIFEST_FILE, LOCK_FILE],
                &[MODULES_DIR],
            ),
            runner,
            state: AdapterState::new(),
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    fn load(&mut self, path: &Path) -> Result<(), AdapterError> {
        let base = self.state.base_path_or(path);
        self.state.reset_modules();

        let data = read_manifest(&base.join(LOCK_FILE))?;
        let lock = parse_manifest(&data)?;
        debug!(
            lockfile_version = lock.lockfile_version,
            entries = lock.packages.len(),
            "Parsed lock file"
        );

        let mut metainfo = MetadataMap::new();
        let root = root_package(&lock, &base);
        let mut root_meta = ModuleMetadata::new(root.name.clone(), root.version.clone());
        root_meta.merge_dependencies(lock.root_package.dependencies.keys());
        root_meta.merge_dependencies(lock.root_package.dev_dependencies.keys());
        metainfo.insert(root.name.clone(), root_meta);
        self.state.modules.push(root);

        for (key, entry) in &lock.packages {
            if entry.link {
                continue;
            }
            let name = package_name_from_key(key, entry);
            let mut pkg = convert_entry(&base, key, &name, entry);

            if let Err(err) = enrich_from_installed(&base.join(key), &mut pkg) {
                warn!(package = %name, error = %err, "Failed to read installed manifest");
                return Err(AdapterError::partial(self.state.modules.clone(), err));
            }

            let hoisted = *key == format!("{MODULES_DIR}/{name}");
            let meta = metainfo
                .entry(name.clone())
                .or_insert_with(|| ModuleMetadata::new(name.clone(), entry.version.clone()));
            if hoisted {
                meta.version = entry.version.clone();
            }
            meta.merge_dependencies(entry.runtime_dependency_names());

            self.state.modules.push(pkg);
        }

        info!(modules = self.state.modules.len(), "Loaded npm modules");
        self.state.mark_loaded(metainfo);
        Ok(())
    }
}

#[async_trait]
impl EcosystemAdapter for NpmAdapter {
    fn metadata(&self) -> AdapterMetadata {
        self.metadata.clone()
    }

    fn is_valid(&mut self, path: &Path) -> bool {
        let valid = path.join(LOCK_FILE).exists();
        if valid {
            self.state.advance(Lifecycle::Validated);
        }
        valid
    }

    async fn has_modules_installed(&mut self, path: &Path) -> Result<(), AdapterError> {
        let modules_dir = self.state.base_path_or(path).join(MODULES_DIR);
        let installed = std::fs::read_dir(&modules_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if installed {
            Ok(())
        } else {
            Err(AdapterError::DependenciesNotInstalled(
                "npm install".to_string(),
            ))
        }
    }

    async fn get_version(&mut self) -> Result<String, AdapterError> {
        let directory = self.state.base_path_or(&std::env::temp_dir());
        let command = CommandOptions::new(CMD_NAME, ["--version"], directory);
        let output = self.runner.output(&command).await.map_err(|e| {
            debug!(error = %e, "npm version query failed");
            AdapterError::VersionNotFound(CMD_NAME.to_string())
        })?;

        let version = output.trim().to_string();
        if version.is_empty() {
            return Err(AdapterError::VersionNotFound(CMD_NAME.to_string()));
        }
        self.state.version = Some(version.clone());
        Ok(version)
    }

    fn set_root_module(&mut self, path: &Path) -> Result<(), AdapterError> {
        self.state.set_base_path(path);
        Ok(())
    }

    async fn get_root_module(&mut self, path: &Path) -> Result<Package, AdapterError> {
        if !self.state.loaded {
            self.load(path)?;
        }
        Ok(self.state.root_module())
    }

    async fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>, AdapterError> {
        if !self.state.loaded {
            self.load(path)?;
        }
        Ok(self.state.modules.clone())
    }

    async fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_config: Option<&Path>,
    ) -> Result<Vec<Package>, AdapterError> {
        let config = match global_config {
            Some(config_path) => HarvestConfig::load(config_path)?,
            None => HarvestConfig::default(),
        };

        let mut modules = self.list_used_modules(path).await?;
        if !config.include_dev {
            modules.retain(|m| m.root || !m.dev);
        }

        let root = self.get_root_module(path).await?;
        if root.is_sentinel() {
            warn!("No root module found in lock file");
        }

        build_dependency_graph(&mut modules, self.state.metainfo.as_ref())?;
        self.state.advance(Lifecycle::GraphBuilt);
        Ok(modules)
    }
}

fn root_package(lock: &PackageLock, base: &Path) -> Package {
    let root = &lock.root_package;
    let mut pkg = Package::new(root.name.clone(), root.version.clone());
    pkg.root = true;
    pkg.local_path = base.display().to_string();
    pkg.package_url = package_url(&root.name, &root.version);
    pkg.license_declared = root.license.clone();
    pkg.checksum = Checksum::new(
        HashAlgorithm::Sha256,
        format!("{}-{}", root.name, root.version),
    );
    pkg
}

fn convert_entry(base: &Path, key: &str, name: &str, entry: &LockPackage) -> Package {
    let mut pkg = Package::new(name, entry.version.clone());
    pkg.path = key.to_string();
    pkg.local_path = base.join(key).display().to_string();
    pkg.package_url = package_url(name, &entry.version);
    pkg.download_location = entry
        .resolved
        .clone()
        .unwrap_or_else(|| tarball_url(name, &entry.version));
    pkg.license_declared = entry.license.clone().unwrap_or_default();
    pkg.checksum = Checksum::new(HashAlgorithm::Sha256, format!("{}-{}", name, entry.version));
    pkg.dev = entry.dev;
    pkg
}

fn package_url(name: &str, version: &str) -> String {
    format!("pkg:npm/{}@{}", name.replace('@', "%40"), version)
}

fn tarball_url(name: &str, version: &str) -> String {
    let basename = name.rsplit('/').next().unwrap_or(name);
    format!("{REGISTRY_URL}/{name}/-/{basename}-{version}.tgz")
}

// ============================================================================
// Installed manifest enrichment
// ============================================================================

#[derive(Debug, Deserialize)]
struct InstalledManifest {
    homepage: Option<String>,
    license: Option<LicenseField>,
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Author {
    /// `"Name <email> (url)"`
    Text(String),
    Object {
        #[serde(default)]
        name: String,
        #[serde(default)]
        email: String,
    },
}

impl Author {
    fn into_supplier(self) -> Supplier {
        match self {
            Author::Object { name, email } => Supplier::new(SupplierType::Person, name, email),
            Author::Text(text) => {
                let name_end = text.find(&['<', '('][..]).unwrap_or(text.len());
                let email = text
                    .find('<')
                    .and_then(|start| {
                        text[start + 1..]
                            .find('>')
                            .map(|end| text[start + 1..start + 1 + end].trim().to_string())
                    })
                    .unwrap_or_default();
                Supplier::new(SupplierType::Person, text[..name_end].trim(), email)
            }
        }
    }
}

fn enrich_from_installed(dir: &Path, pkg: &mut Package) -> Result<(), AdapterError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Ok(());
    }

    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        AdapterError::ConversionFailed(format!("{}: {}", manifest_path.display(), e))
    })?;
    let installed: InstalledManifest = serde_json::from_str(&content).map_err(|e| {
        AdapterError::ConversionFailed(format!("{}: {}", manifest_path.display(), e))
    })?;

    if let Some(homepage) = installed.homepage {
        pkg.home_page = homepage;
    }
    if pkg.license_declared.is_empty() {
        if let Some(license) = installed.license {
            pkg.license_declared = license.into_id();
        }
    }
    if let Some(author) = installed.author {
        pkg.supplier = author.into_supplier();
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedRunner;
    use crate::harvest::graph::DependencyTree;
    use crate::model::PackageId;
    use super::lockfile::ECOMMERCE_LOCK_V2;
    use std::fs;
    use tempfile::TempDir;

    const EXPRESS_LOCK_V3: &str = r#"{
  "name": "shop",
  "version": "2.0.0",
  "lockfileVersion": 3,
  "packages": {
    "": {
      "name": "shop",
      "version": "2.0.0",
      "license": "MIT",
      "dependencies": { "express": "^4.18.0" },
      "devDependencies": { "mocha": "^10.0.0" }
    },
    "node_modules/express": {
      "version": "4.18.2",
      "license": "MIT",
      "dependencies": { "debug": "2.6.9", "missing-peer": "^1.0.0" }
    },
    "node_modules/debug": {
      "version": "2.6.9",
      "dependencies": { "ms": "2.0.0" }
    },
    "node_modules/ms": { "version": "2.0.0" },
    "node_modules/mocha": {
      "version": "10.2.0",
      "dev": true,
      "dependencies": { "debug": "4.3.4" }
    },
    "node_modules/mocha/node_modules/debug": {
      "version": "4.3.4",
      "dev": true,
      "dependencies": { "ms": "2.1.2" }
    },
    "node_modules/@types/node": { "version": "20.1.0", "dev": true },
    "packages/web": { "name": "@shop/web", "version": "0.0.1" },
    "node_modules/@shop/web": { "resolved": "packages/web", "link": true }
  }
}"#;

    fn project(lock: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), lock).unwrap();
        dir
    }

    fn adapter() -> NpmAdapter {
        NpmAdapter::new(Arc::new(ScriptedRunner::new().respond("npm --version", "10.2.4\n")))
    }

    fn find<'a>(modules: &'a [Package], key: &str) -> &'a Package {
        modules
            .iter()
            .find(|m| m.path == key || (key.is_empty() && m.root))
            .unwrap()
    }

    #[test]
    fn test_is_valid_requires_lock_file() {
        let dir = project(ECOMMERCE_LOCK_V2);
        let empty = tempfile::tempdir().unwrap();
        let mut npm = adapter();
        assert!(!npm.is_valid(empty.path()));
        assert!(npm.is_valid(dir.path()));
        assert_eq!(npm.state().stage, Lifecycle::Validated);
    }

    #[tokio::test]
    async fn test_get_version() {
        let mut npm = adapter();
        assert_eq!(npm.get_version().await.unwrap(), "10.2.4");

        let mut missing = NpmAdapter::new(Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            missing.get_version().await,
            Err(AdapterError::VersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_has_modules_installed() {
        let dir = project(ECOMMERCE_LOCK_V2);
        let mut npm = adapter();
        assert!(matches!(
            npm.has_modules_installed(dir.path()).await,
            Err(AdapterError::DependenciesNotInstalled(_))
        ));

        fs::create_dir_all(dir.path().join("node_modules/core-js")).unwrap();
        assert!(npm.has_modules_installed(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_used_modules_from_lock() {
        let dir = project(ECOMMERCE_LOCK_V2);
        let mut npm = adapter();
        npm.set_root_module(dir.path()).unwrap();

        let modules = npm.list_used_modules(dir.path()).await.unwrap();
        assert_eq!(modules.len(), 7);
        assert_eq!(modules.iter().filter(|m| m.root).count(), 1);

        let root = find(&modules, "");
        assert_eq!(root.name, "e-commerce");
        assert_eq!(root.license_declared, "ISC");

        let core_js = find(&modules, "node_modules/core-js");
        assert_eq!(core_js.name, "core-js");
        assert_eq!(core_js.version, "3.8.3");
        assert_eq!(core_js.package_url, "pkg:npm/core-js@3.8.3");
        assert_eq!(
            core_js.download_location,
            "https://registry.npmjs.org/core-js/-/core-js-3.8.3.tgz"
        );
        assert!(!core_js.dev);
        assert!(find(&modules, "node_modules/babylon").dev);
        assert_eq!(npm.state().stage, Lifecycle::Loaded);
    }

    #[tokio::test]
    async fn test_list_used_modules_is_idempotent() {
        let dir = project(EXPRESS_LOCK_V3);
        let mut npm = adapter();
        let first = npm.list_used_modules(dir.path()).await.unwrap();
        let second = npm.list_used_modules(dir.path()).await.unwrap();
        assert_eq!(first, second);

        let mut fresh = adapter();
        assert_eq!(fresh.list_used_modules(dir.path()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_link_entries_are_skipped() {
        let dir = project(EXPRESS_LOCK_V3);
        let mut npm = adapter();
        let modules = npm.list_used_modules(dir.path()).await.unwrap();
        assert!(modules.iter().all(|m| m.path != "node_modules/@shop/web"));
        assert_eq!(find(&modules, "packages/web").name, "@shop/web");
        assert_eq!(
            find(&modules, "node_modules/@types/node").package_url,
            "pkg:npm/%40types/node@20.1.0"
        );
    }

    #[tokio::test]
    async fn test_get_root_module_loads_lazily() {
        let dir = project(EXPRESS_LOCK_V3);
        let mut npm = adapter();
        let root = npm.get_root_module(dir.path()).await.unwrap();
        assert_eq!(root.name, "shop");
        assert!(root.root);
        assert!(npm.state().loaded);
    }

    #[tokio::test]
    async fn test_missing_lock_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut npm = adapter();
        assert!(matches!(
            npm.list_used_modules(dir.path()).await,
            Err(AdapterError::Lockfile(lockfile::LockfileError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_list_modules_with_deps() {
        let dir = project(EXPRESS_LOCK_V3);
        let mut npm = adapter();
        npm.set_root_module(dir.path()).unwrap();
        let modules = npm.list_modules_with_deps(dir.path(), None).await.unwrap();

        let tree = DependencyTree::new(&modules);
        let root_id = tree.root().unwrap();
        let root = tree.get(root_id).unwrap();
        assert_eq!(root.children.len(), 2);

        let express = tree.get(root.children["express"]).unwrap();
        assert_eq!(express.version, "4.18.2");
        // undeclared in the lock, so no edge
        assert!(!express.children.contains_key("missing-peer"));

        // production parent resolves the hoisted, non-dev debug
        let debug = tree.get(express.children["debug"]).unwrap();
        assert_eq!(debug.version, "2.6.9");
        assert!(debug.children.contains_key("ms"));

        assert_eq!(npm.state().stage, Lifecycle::GraphBuilt);
        // root, express, debug, ms, mocha
        assert_eq!(tree.reachable().len(), 5);
    }

    #[tokio::test]
    async fn test_global_config_excludes_dev() {
        let dir = project(EXPRESS_LOCK_V3);
        let config = dir.path().join("harvest.json");
        fs::write(&config, r#"{ "include_dev": false }"#).unwrap();

        let mut npm = adapter();
        let modules = npm
            .list_modules_with_deps(dir.path(), Some(&config))
            .await
            .unwrap();
        assert!(modules.iter().all(|m| !m.dev));

        let tree = DependencyTree::new(&modules);
        let root = tree.get(tree.root().unwrap()).unwrap();
        assert_eq!(root.children.keys().collect::<Vec<_>>(), vec!["express"]);
        assert!(modules
            .iter()
            .flat_map(|m| m.children.values())
            .all(|id: &PackageId| id.index() < modules.len()));
    }

    #[tokio::test]
    async fn test_enriches_from_installed_manifest() {
        let dir = project(EXPRESS_LOCK_V3);
        let installed = dir.path().join("node_modules/debug");
        fs::create_dir_all(&installed).unwrap();
        fs::write(
            installed.join(MANIFEST_FILE),
            r#"{
  "name": "debug",
  "homepage": "https://github.com/debug-js/debug#readme",
  "license": "MIT",
  "author": "TJ Holowaychuk <tj@vision-media.ca> (http://tjholowaychuk.com)"
}"#,
        )
        .unwrap();

        let mut npm = adapter();
        let modules = npm.list_used_modules(dir.path()).await.unwrap();
        let debug = find(&modules, "node_modules/debug");
        assert_eq!(debug.home_page, "https://github.com/debug-js/debug#readme");
        assert_eq!(debug.license_declared, "MIT");
        assert_eq!(
            debug.supplier.get(),
            "Person: TJ Holowaychuk (tj@vision-media.ca)"
        );
    }

    #[tokio::test]
    async fn test_malformed_installed_manifest_returns_partial() {
        let dir = project(EXPRESS_LOCK_V3);
        let installed = dir.path().join("node_modules/ms");
        fs::create_dir_all(&installed).unwrap();
        fs::write(installed.join(MANIFEST_FILE), "{ broken").unwrap();

        let mut npm = adapter();
        let err = npm.list_used_modules(dir.path()).await.unwrap_err();
        let partial = err.partial_modules().unwrap();
        // entries keyed before node_modules/ms were collected
        assert!(partial.iter().any(|m| m.root));
        assert!(partial.iter().all(|m| m.name != "ms"));
        assert!(!npm.state().loaded);
    }
}
