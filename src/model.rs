//! Canonical, ecosystem-agnostic package model shared by every adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use sha1::Digest;

// ============================================================================
// Package
// ============================================================================

/// Index of a [`Package`] inside the module list it was returned with.
///
/// The module list is the arena: `children` maps hold ids rather than nested
/// copies, so a dependency pulled in by many parents exists exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub usize);

impl PackageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single package as discovered by an adapter.
///
/// The model is permissive on purpose: different ecosystems surface different
/// levels of detail, so `version`, `path` and the license fields may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Ecosystem-specific install key (e.g. `node_modules/foo`)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Location on disk, empty when not vendored locally
    #[serde(rename = "dir")]
    pub local_path: String,

    #[serde(rename = "purl")]
    pub package_url: String,

    pub checksum: Checksum,
    pub home_page: String,
    pub download_location: String,
    pub license_concluded: String,
    pub license_declared: String,
    pub license_comments: String,
    pub other_licenses: Vec<License>,
    pub copyright: String,
    pub comment: String,
    pub supplier: Supplier,

    /// True iff this is the project under analysis
    pub root: bool,

    /// True when the package is only needed for development
    pub dev: bool,

    /// Direct dependency edges, keyed by dependency name
    pub children: BTreeMap<String, PackageId>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// The empty package returned when no root module could be determined.
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn is_sentinel(&self) -> bool {
        self.name.is_empty()
    }

    /// De-duplication key within one build (`name@version`).
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// A license record attached to a package in addition to the declared one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub name: String,
    pub extracted_text: String,
    pub comments: String,
    pub file: String,
}

// ============================================================================
// Supplier
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SupplierType {
    Person,
    #[default]
    Organization,
}

impl fmt::Display for SupplierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplierType::Person => write!(f, "Person"),
            SupplierType::Organization => write!(f, "Organization"),
        }
    }
}

/// How [`Supplier::get`] renders the supplier.
#[derive(Clone, Default)]
pub enum SupplierFormat {
    /// `"<Type>: <Name> (<Email>)"`
    #[default]
    Default,

    /// Adapter-provided rendering that replaces the default rule entirely
    Custom(Arc<dyn Fn() -> String + Send + Sync>),
}

impl fmt::Debug for SupplierFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplierFormat::Default => write!(f, "Default"),
            SupplierFormat::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PartialEq for SupplierFormat {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SupplierFormat::Default, SupplierFormat::Default) => true,
            (SupplierFormat::Custom(a), SupplierFormat::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Provenance of a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Supplier {
    #[serde(rename = "type")]
    pub supplier_type: Option<SupplierType>,
    pub name: String,
    pub email: String,

    #[serde(skip)]
    pub format: SupplierFormat,
}

impl Supplier {
    pub fn new(
        supplier_type: SupplierType,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            supplier_type: Some(supplier_type),
            name: name.into(),
            email: email.into(),
            format: SupplierFormat::Default,
        }
    }

    pub fn custom<F>(render: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            format: SupplierFormat::Custom(Arc::new(render)),
            ..Default::default()
        }
    }

    fn email_is_empty(&self) -> bool {
        let email = self.email.to_lowercase();
        email.is_empty() || email == "none" || email == "unknown"
    }

    /// Renders the supplier, e.g. `"Person: Jane (jane@x.com)"`.
    ///
    /// Empty when the name is empty. An unset type renders as
    /// `Organization`.
    pub fn get(&self) -> String {
        if let SupplierFormat::Custom(render) = &self.format {
            return render();
        }

        if self.name.is_empty() {
            return String::new();
        }

        let supplier_type = self.supplier_type.unwrap_or_default();
        let mut rendered = format!("{}: {}", supplier_type, self.name);
        if !self.email_is_empty() {
            rendered.push_str(&format!(" ({})", self.email));
        }
        rendered
    }
}

// ============================================================================
// Checksum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA224")]
    Sha224,
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA384")]
    Sha384,
    #[serde(rename = "SHA512")]
    Sha512,
    #[serde(rename = "MD2")]
    Md2,
    #[serde(rename = "MD4")]
    Md4,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "MD6")]
    Md6,
    #[serde(rename = "unsupported")]
    #[default]
    Unsupported,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha224 => "SHA224",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Md2 => "MD2",
            HashAlgorithm::Md4 => "MD4",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Md6 => "MD6",
            HashAlgorithm::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive lookup of a hash algorithm name.
///
/// Total: anything unrecognized (including the empty string) maps to
/// [`HashAlgorithm::Unsupported`].
pub fn hash_algorithm(name: &str) -> HashAlgorithm {
    match name.to_uppercase().as_str() {
        "SHA1" => HashAlgorithm::Sha1,
        "SHA224" => HashAlgorithm::Sha224,
        "SHA256" => HashAlgorithm::Sha256,
        "SHA384" => HashAlgorithm::Sha384,
        "SHA512" => HashAlgorithm::Sha512,
        "MD2" => HashAlgorithm::Md2,
        "MD4" => HashAlgorithm::Md4,
        "MD5" => HashAlgorithm::Md5,
        "MD6" => HashAlgorithm::Md6,
        _ => HashAlgorithm::Unsupported,
    }
}

/// Integrity record of a package.
///
/// The digest over `content` is computed on first access and cached.
#[derive(Debug, Clone, Default)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub content: Vec<u8>,
    value: OnceCell<String>,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, content: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            content: content.into(),
            value: OnceCell::new(),
        }
    }

    /// Lower-case hex digest of `content`, computed once.
    pub fn value(&self) -> &str {
        self.value.get_or_init(|| self.compute(&self.content))
    }

    /// Hashes `content` with this checksum's algorithm.
    ///
    /// MD6 has no implementation here and, like unsupported names, falls
    /// back to SHA1.
    pub fn compute(&self, content: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Sha224 => hex_digest::<sha2::Sha224>(content),
            HashAlgorithm::Sha256 => hex_digest::<sha2::Sha256>(content),
            HashAlgorithm::Sha384 => hex_digest::<sha2::Sha384>(content),
            HashAlgorithm::Sha512 => hex_digest::<sha2::Sha512>(content),
            HashAlgorithm::Md2 => hex_digest::<md2::Md2>(content),
            HashAlgorithm::Md4 => hex_digest::<md4::Md4>(content),
            HashAlgorithm::Md5 => hex_digest::<md5::Md5>(content),
            HashAlgorithm::Sha1 | HashAlgorithm::Md6 | HashAlgorithm::Unsupported => {
                hex_digest::<sha1::Sha1>(content)
            }
        }
    }
}

fn hex_digest<D: Digest>(content: &[u8]) -> String {
    hex::encode(D::digest(content))
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

impl PartialEq for Checksum {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.content == other.content
    }
}

impl Eq for Checksum {}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Checksum", 2)?;
        state.serialize_field("algorithm", &self.algorithm)?;
        state.serialize_field("value", self.value())?;
        state.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
