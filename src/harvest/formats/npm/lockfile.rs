//! `package-lock.json` decoding.
//!
//! Lock format versions 2 and 3 are flat-keyed: a `packages` map from install
//! path (`node_modules/a/node_modules/b`) to entry. Version 1 nests entries
//! under `dependencies`; [`parse_manifest`] normalizes it to the same flat
//! mapping so consumers only ever see one shape.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

const NODE_MODULES: &str = "node_modules/";

#[derive(Error, Debug)]
pub enum LockfileError {
    #[error("Lock file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode lock file: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unsupported lockfileVersion {0}")]
    UnsupportedVersion(u32),
}

pub type DependencyMap = BTreeMap<String, String>;

/// Decoded lock file in the flat-keyed shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageLock {
    pub name: String,
    pub version: String,
    pub lockfile_version: u32,
    /// The project itself (the `""` entry of `packages`)
    pub root_package: RootPackage,
    /// Every other entry, keyed by install path
    pub packages: BTreeMap<String, LockPackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootPackage {
    pub name: String,
    pub version: String,
    pub license: String,
    pub dependencies: DependencyMap,
    pub dev_dependencies: DependencyMap,
}

/// `engines` is a map in current npm but an array in some legacy packages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Engines {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

/// `license` as a SPDX string, or the legacy `{ "type": ..., "url": ... }` object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LicenseField {
    Id(String),
    Object {
        #[serde(rename = "type")]
        kind: String,
    },
}

impl LicenseField {
    pub fn into_id(self) -> String {
        match self {
            LicenseField::Id(id) => id,
            LicenseField::Object { kind } => kind,
        }
    }
}

fn license_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<LicenseField>::deserialize(deserializer)?.map(LicenseField::into_id))
}

/// One entry of the `packages` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPackage {
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    #[serde(default, deserialize_with = "license_id")]
    pub license: Option<String>,
    pub dependencies: Option<DependencyMap>,
    pub dev_dependencies: Option<DependencyMap>,
    pub optional_dependencies: Option<DependencyMap>,
    pub peer_dependencies: Option<DependencyMap>,
    pub engines: Option<Engines>,
    pub bin: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub has_install_script: bool,
    /// Workspace symlink; the target has its own entry
    #[serde(default)]
    pub link: bool,
}

impl LockPackage {
    /// Names this entry needs at runtime (regular and optional dependencies).
    pub fn runtime_dependency_names(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .iter()
            .chain(self.optional_dependencies.iter())
            .flat_map(|deps| deps.keys())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockV2 {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    lockfile_version: u32,
    #[serde(default)]
    packages: BTreeMap<String, LockPackage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockV1 {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    dependencies: BTreeMap<String, LegacyDependency>,
}

#[derive(Debug, Deserialize)]
struct LegacyDependency {
    #[serde(default)]
    version: String,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    requires: Option<DependencyMap>,
    #[serde(default)]
    dependencies: BTreeMap<String, LegacyDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    #[serde(default = "default_lockfile_version")]
    lockfile_version: u32,
}

fn default_lockfile_version() -> u32 {
    1
}

/// Reads the raw lock document.
pub fn read_manifest(path: &Path) -> Result<Vec<u8>, LockfileError> {
    if !path.exists() {
        return Err(LockfileError::NotFound(path.to_path_buf()));
    }
    Ok(std::fs::read(path)?)
}

/// Parses a flat-keyed (v2/v3) lock document.
///
/// Range strings are returned exactly as declared. Decoder errors are
/// returned as-is and no partial result is produced.
pub fn parse_manifest_v2(data: &[u8]) -> Result<PackageLock, LockfileError> {
    let raw: RawLockV2 = serde_json::from_slice(data)?;
    let mut packages = raw.packages;
    let root_entry = packages.remove("").unwrap_or_default();

    let root_package = RootPackage {
        name: root_entry.name.unwrap_or_else(|| raw.name.clone()),
        version: if root_entry.version.is_empty() {
            raw.version.clone()
        } else {
            root_entry.version
        },
        license: root_entry.license.unwrap_or_default(),
        dependencies: root_entry.dependencies.unwrap_or_default(),
        dev_dependencies: root_entry.dev_dependencies.unwrap_or_default(),
    };

    Ok(PackageLock {
        name: raw.name,
        version: raw.version,
        lockfile_version: raw.lockfile_version,
        root_package,
        packages,
    })
}

/// Parses any supported lock version into the flat-keyed shape.
pub fn parse_manifest(data: &[u8]) -> Result<PackageLock, LockfileError> {
    let probe: VersionProbe = serde_json::from_slice(data)?;
    match probe.lockfile_version {
        1 => parse_manifest_v1(data),
        2 | 3 => parse_manifest_v2(data),
        other => Err(LockfileError::UnsupportedVersion(other)),
    }
}

fn parse_manifest_v1(data: &[u8]) -> Result<PackageLock, LockfileError> {
    let raw: RawLockV1 = serde_json::from_slice(data)?;

    let mut root_package = RootPackage {
        name: raw.name.clone(),
        version: raw.version.clone(),
        ..Default::default()
    };
    for (name, dep) in &raw.dependencies {
        let deps = if dep.dev {
            &mut root_package.dev_dependencies
        } else {
            &mut root_package.dependencies
        };
        deps.insert(name.clone(), dep.version.clone());
    }

    let mut packages = BTreeMap::new();
    flatten_legacy("", raw.dependencies, &mut packages);

    Ok(PackageLock {
        name: raw.name,
        version: raw.version,
        lockfile_version: 1,
        root_package,
        packages,
    })
}

fn flatten_legacy(
    prefix: &str,
    dependencies: BTreeMap<String, LegacyDependency>,
    out: &mut BTreeMap<String, LockPackage>,
) {
    for (name, dep) in dependencies {
        let key = format!("{prefix}{NODE_MODULES}{name}");
        out.insert(
            key.clone(),
            LockPackage {
                version: dep.version,
                resolved: dep.resolved,
                integrity: dep.integrity,
                dependencies: dep.requires,
                dev: dep.dev,
                optional: dep.optional,
                ..Default::default()
            },
        );
        flatten_legacy(&format!("{key}/"), dep.dependencies, out);
    }
}

/// Package name for an install key.
///
/// `node_modules/@scope/a/node_modules/b` gives `b`; keys outside
/// `node_modules` (workspace folders) use the entry's own `name`, falling
/// back to the last path component.
pub fn package_name_from_key(key: &str, entry: &LockPackage) -> String {
    if let Some(pos) = key.rfind(NODE_MODULES) {
        return key[pos + NODE_MODULES.len()..].to_string();
    }
    entry
        .name
        .clone()
        .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string())
}

/// Lock fixture shared by the parser and adapter tests.
#[cfg(test)]
pub(crate) const ECOMMERCE_LOCK_V2: &str = r#"{
  "name": "e-commerce",
  "version": "1.0.0",
  "lockfileVersion": 2,
  "requires": true,
  "packages": {
"": {
  "name": "e-commerce",
  "version": "1.0.0",
  "license": "ISC",
  "dependencies": {
    "bcryptjs": "^2.4.3",
    "call-bind": "^1.0.2",
    "core-js": "^3.8.0"
  },
  "devDependencies": {
    "babel-preset-env": "^1.7.0"
  }
},
"node_modules/ansi-regex": {
  "version": "2.1.1",
  "dev": true,
  "engines": { "node": ">=0.10.0" }
},
"node_modules/babel-code-frame": {
  "version": "6.26.0",
  "dev": true,
  "dependencies": {
    "chalk": "^1.1.3",
    "esutils": "^2.0.2",
    "js-tokens": "^3.0.2"
  }
},
"node_modules/babylon": {
  "version": "6.18.0",
  "dev": true,
  "bin": { "babylon": "bin/babylon.js" }
},
"node_modules/call-bind": {
  "version": "1.0.2",
  "dependencies": {
    "function-bind": "^1.1.1",
    "get-intrinsic": "^1.0.2"
  }
},
"node_modules/core-js": {
  "version": "3.8.3",
  "hasInstallScript": true
},
"node_modules/legacy-engines": {
  "version": "0.0.1",
  "engines": ["node >= 0.4"]
}
  }
}"#;

// ============================================================================
// Tests
// ============================================================================
