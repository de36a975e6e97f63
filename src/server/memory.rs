// src/server/memory.rs

//! In-memory package server
//!
//! A complete in-process catalog: package versions with optional binary
//! payloads, wildcard-aware resolution, substring search with paging.
//! Used for offline fixtures and as the backend for integration tests.

use crate::error::{Error, Result};
use crate::model::{compare_versions, CatalogEntry, PackageSpec, PackageVersion};
use crate::server::{ChecksumMode, PackageServer};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

struct StoredPackage {
    version: PackageVersion,
    binary: Option<Vec<u8>>,
}

/// In-process catalog backed by a plain list of package versions
pub struct InMemoryPackageServer {
    name: String,
    url_base: String,
    connected: AtomicBool,
    credentials: Option<(String, String)>,
    packages: Mutex<Vec<StoredPackage>>,
}

impl InMemoryPackageServer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            url_base: format!("memory://{name}"),
            name,
            connected: AtomicBool::new(true),
            credentials: None,
            packages: Mutex::new(Vec::new()),
        }
    }

    /// Require a username/password pair before `login` succeeds
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self.connected = AtomicBool::new(false);
        self
    }

    /// Add a package version without a binary payload
    pub fn insert(&self, version: PackageVersion) {
        self.packages.lock().unwrap().push(StoredPackage {
            version,
            binary: None,
        });
    }

    /// Add a package version together with its binary
    ///
    /// The checksum is filled in from the payload when the metadata does
    /// not already carry one.
    pub fn insert_with_binary(&self, mut version: PackageVersion, binary: Vec<u8>) {
        if version.checksum.is_none() {
            version.checksum = Some(hex::encode(Sha256::digest(&binary)));
        }
        version.has_binary = true;
        self.packages.lock().unwrap().push(StoredPackage {
            version,
            binary: Some(binary),
        });
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn spec_matches(stored: &PackageVersion, spec: &PackageSpec) -> bool {
        let field = |requested: Option<&str>, actual: &str| match requested {
            Some(r) => r == actual,
            None => true,
        };
        stored.name == spec.name
            && field(spec.distributor.as_deref(), &stored.distributor)
            && field(spec.version.as_deref(), &stored.version)
            && field(spec.branch.as_deref(), &stored.branch)
            && field(spec.target.as_deref(), &stored.target)
            && field(spec.configuration.as_deref(), &stored.configuration)
    }

    fn resolve(&self, spec: &PackageSpec, include_binary: bool) -> Option<PackageVersion> {
        let packages = self.packages.lock().unwrap();
        let best = packages
            .iter()
            .filter(|p| Self::spec_matches(&p.version, spec))
            .max_by(|a, b| compare_versions(&a.version.version, &b.version.version))?;

        let mut version = best.version.clone();
        version.has_binary = best.binary.is_some();
        if !include_binary {
            version.license_binary = None;
        }
        Some(version)
    }
}

#[async_trait]
impl PackageServer for InMemoryPackageServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_base(&self) -> &str {
        &self.url_base
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        if let Some((user, pass)) = &self.credentials {
            if user != username || pass != password {
                return Err(Error::LoginError {
                    server: self.name.clone(),
                    message: "invalid credentials".to_string(),
                });
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        if self.credentials.is_some() {
            self.connected.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn search(
        &self,
        filter: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<CatalogEntry>, bool)> {
        let packages = self.packages.lock().unwrap();
        let names: BTreeSet<&str> = packages
            .iter()
            .filter(|p| {
                filter.is_none_or(|term| {
                    let term = term.to_lowercase();
                    p.version.name.to_lowercase().contains(&term)
                        || p.version
                            .title
                            .as_deref()
                            .is_some_and(|t| t.to_lowercase().contains(&term))
                        || p.version.distributor.to_lowercase().contains(&term)
                })
            })
            .map(|p| p.version.name.as_str())
            .collect();

        let start = page * per_page;
        let entries: Vec<CatalogEntry> = names
            .iter()
            .skip(start)
            .take(per_page)
            .filter_map(|name| {
                packages
                    .iter()
                    .find(|p| p.version.name == *name)
                    .map(|stored| CatalogEntry {
                        name: stored.version.name.clone(),
                        display_name: stored.version.title.clone(),
                        distributor: Some(stored.version.distributor.clone()),
                        description: None,
                    })
            })
            .collect();

        let has_more = start + entries.len() < names.len();
        Ok((entries, has_more))
    }

    async fn resolve_version(&self, spec: &PackageSpec) -> Result<Option<PackageVersion>> {
        debug!("Resolving {} on '{}'", spec.cache_key(), self.name);
        Ok(self.resolve(spec, false))
    }

    async fn get_package_version(
        &self,
        spec: &PackageSpec,
        include_binary: bool,
    ) -> Result<Option<PackageVersion>> {
        Ok(self.resolve(spec, include_binary))
    }

    async fn get_package(&self, distributor: &str, name: &str) -> Result<Option<CatalogEntry>> {
        let packages = self.packages.lock().unwrap();
        Ok(packages
            .iter()
            .find(|p| p.version.name == name && p.version.distributor == distributor)
            .map(|p| CatalogEntry {
                name: p.version.name.clone(),
                display_name: p.version.title.clone(),
                distributor: Some(p.version.distributor.clone()),
                description: None,
            }))
    }

    async fn download_package_version(
        &self,
        version: &PackageVersion,
        checksum: ChecksumMode,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let packages = self.packages.lock().unwrap();
        let stored = packages
            .iter()
            .find(|p| Self::spec_matches(&p.version, &version.spec()))
            .ok_or_else(|| {
                Error::DownloadError(format!(
                    "'{}' {} is not in the catalog of '{}'",
                    version.name, version.version, self.name
                ))
            })?;

        let binary = stored.binary.as_ref().ok_or_else(|| {
            Error::DownloadError(format!(
                "'{}' {} has no binary on '{}'",
                version.name, version.version, self.name
            ))
        })?;

        if checksum == ChecksumMode::Verify {
            if let Some(expected) = &version.checksum {
                let actual = hex::encode(Sha256::digest(binary));
                if &actual != expected {
                    return Err(Error::ChecksumMismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        std::fs::create_dir_all(dest_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create directory {}: {e}",
                dest_dir.display()
            ))
        })?;
        let dest_path = dest_dir.join(version.binary_file_name());
        std::fs::write(&dest_path, binary).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {e}", dest_path.display()))
        })?;

        Ok(dest_path)
    }

    fn invalidate_cache(&self) {}
}
