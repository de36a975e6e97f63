// src/model/mod.rs

//! Package data model
//!
//! - [`PackageSpec`]: a possibly wildcarded request for a package. `None`
//!   fields mean "unconstrained", not a distinct value.
//! - [`PackageVersion`]: fully resolved metadata. Identity fields are never
//!   wildcards; resolution either yields a concrete version or nothing.
//! - [`CatalogEntry`]: lightweight listing summary.
//! - [`PackageItem`]: one package occurrence bundling the requested spec,
//!   the resolved "used" and "latest" metadata, and the owning server.

use crate::server::SharedServer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A (possibly wildcarded) request for a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor: Option<String>,
    /// `None` means "latest/unconstrained"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

fn field_matches(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        // A missing field is a wildcard, not a distinct value
        _ => true,
    }
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_distributor(mut self, distributor: impl Into<String>) -> Self {
        self.distributor = Some(distributor.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// Composite identity for caching and de-duplication
    pub fn cache_key(&self) -> String {
        let field = |f: &Option<String>| f.as_deref().unwrap_or("*").to_string();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.name,
            field(&self.distributor),
            field(&self.version),
            field(&self.branch),
            field(&self.target),
            field(&self.configuration)
        )
    }

    /// Wildcard-aware identity match against another specification
    ///
    /// A `None` field on either side matches anything.
    pub fn matches(&self, other: &PackageSpec) -> bool {
        self.name == other.name
            && field_matches(self.version.as_deref(), other.version.as_deref())
            && field_matches(self.branch.as_deref(), other.branch.as_deref())
            && field_matches(self.target.as_deref(), other.target.as_deref())
            && field_matches(
                self.configuration.as_deref(),
                other.configuration.as_deref(),
            )
    }
}

/// Fully resolved package version metadata
///
/// Invariant: identity fields (`version`, `branch`, `target`,
/// `configuration`, `distributor`) are concrete, never wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    pub distributor: String,
    pub version: String,
    pub branch: String,
    pub target: String,
    pub configuration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Release-train tag shared by packages that version-synchronize together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Runtime license artifact staged into the host's license store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_binary: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// SHA-256 of the binary, when the server publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub has_binary: bool,
    /// Dependency references with resolved versions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageSpec>,
}

impl PackageVersion {
    /// Project this metadata back into a concrete (fully pinned) specification
    pub fn spec(&self) -> PackageSpec {
        PackageSpec {
            name: self.name.clone(),
            distributor: Some(self.distributor.clone()),
            version: Some(self.version.clone()),
            branch: Some(self.branch.clone()),
            target: Some(self.target.clone()),
            configuration: Some(self.configuration.clone()),
        }
    }

    /// Suggested file name for the downloaded binary
    pub fn binary_file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.library",
            self.name, self.version, self.target, self.configuration
        )
        .replace(['/', '\\', ' '], "-")
    }
}

/// Compare two version strings
///
/// Parses both as semver when possible and falls back to string
/// comparison otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Lightweight catalog listing entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CatalogEntry {
    /// Case-insensitive substring match over name, display name and distributor
    pub fn matches_filter(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&term)
            || self
                .display_name
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term))
            || self
                .distributor
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term))
    }
}

fn default_true() -> bool {
    true
}

/// Per-package install options persisted alongside the specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOptions {
    /// Whether dependencies become explicit project references too
    #[serde(default = "default_true")]
    pub add_dependencies: bool,
    #[serde(default)]
    pub qualified_only: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub optional: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            add_dependencies: true,
            qualified_only: false,
            hidden: false,
            optional: false,
        }
    }
}

/// Composite de-duplication key: (project, plc, package name)
pub type ItemKey = (String, String, String);

/// One resolved package occurrence
///
/// Created per resolution call and owned by the caller; only the pinned
/// specification is ever persisted back into the configuration.
#[derive(Clone, Default)]
pub struct PackageItem {
    /// Consumer context; empty for context-free lookups
    pub project: String,
    pub plc: String,
    /// The original request specification
    pub config: PackageSpec,
    /// What is currently referenced
    pub used: Option<PackageVersion>,
    /// Latest available, independent of what is referenced
    pub update: Option<PackageVersion>,
    pub catalog: Option<CatalogEntry>,
    /// Server that satisfied the resolution, if any
    pub server: Option<SharedServer>,
    pub options: Option<PackageOptions>,
    /// Resolved one level deep when metadata was requested; `None` means
    /// metadata has not been resolved yet
    pub dependencies: Option<Vec<PackageItem>>,
}

impl PackageItem {
    pub fn new(project: impl Into<String>, plc: impl Into<String>, config: PackageSpec) -> Self {
        Self {
            project: project.into(),
            plc: plc.into(),
            config,
            ..Self::default()
        }
    }

    /// An item with no consumer context
    pub fn context_free(config: PackageSpec) -> Self {
        Self::new("", "", config)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn key(&self) -> ItemKey {
        (
            self.project.clone(),
            self.plc.clone(),
            self.config.name.clone(),
        )
    }

    /// Whether any server yielded a resolution
    pub fn is_resolved(&self) -> bool {
        self.used.is_some() || self.update.is_some()
    }

    /// Whether full metadata (including dependencies) has been resolved
    pub fn has_metadata(&self) -> bool {
        self.dependencies.is_some()
    }

    /// The version this item pins: what is used, else the latest known
    pub fn pinned(&self) -> Option<&PackageVersion> {
        self.used.as_ref().or(self.update.as_ref())
    }
}

impl fmt::Debug for PackageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageItem")
            .field("project", &self.project)
            .field("plc", &self.plc)
            .field("config", &self.config)
            .field("used", &self.used)
            .field("update", &self.update)
            .field("server", &self.server.as_ref().map(|s| s.name().to_string()))
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
