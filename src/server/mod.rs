// src/server/mod.rs

//! Package server capability and implementations
//!
//! A [`PackageServer`] is one remote catalog: search, version resolution,
//! metadata and binary fetch, login. Servers are composed into a
//! [`PackageServerCollection`] which provides fallback-ordered, cached
//! operations across all of them.

mod collection;
mod http;
mod memory;

pub use collection::PackageServerCollection;
pub use http::HttpPackageServer;
pub use memory::InMemoryPackageServer;

use crate::error::Result;
use crate::model::{CatalogEntry, PackageSpec, PackageVersion};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to one package server
pub type SharedServer = Arc<dyn PackageServer>;

/// Whether a downloaded binary is verified against its published checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    #[default]
    Verify,
    Ignore,
}

/// Capability interface to one remote package catalog
///
/// "Not found" is an empty result, never an error; errors signal transport
/// or protocol failures. Pages are zero-based.
#[async_trait]
pub trait PackageServer: Send + Sync {
    /// Stable name for logging and server lookup
    fn name(&self) -> &str;

    /// Base location of the catalog, for logging
    fn url_base(&self) -> &str;

    /// Whether the server is usable for resolution right now
    fn connected(&self) -> bool;

    /// Authenticate against the catalog
    async fn login(&self, username: &str, password: &str) -> Result<()>;

    /// Drop any stored credentials
    async fn logout(&self) -> Result<()> {
        Ok(())
    }

    /// One page of catalog entries matching `filter`, plus a has-more flag
    async fn search(
        &self,
        filter: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<CatalogEntry>, bool)>;

    /// Resolve a possibly wildcarded specification to concrete metadata
    async fn resolve_version(&self, spec: &PackageSpec) -> Result<Option<PackageVersion>>;

    /// Full metadata for a specification, optionally with binary payloads
    async fn get_package_version(
        &self,
        spec: &PackageSpec,
        include_binary: bool,
    ) -> Result<Option<PackageVersion>>;

    /// Lightweight catalog summary for one package
    async fn get_package(&self, distributor: &str, name: &str) -> Result<Option<CatalogEntry>>;

    /// Download the binary for a resolved version into `dest_dir`
    ///
    /// Returns the path of the downloaded file.
    async fn download_package_version(
        &self,
        version: &PackageVersion,
        checksum: ChecksumMode,
        dest_dir: &Path,
    ) -> Result<PathBuf>;

    /// Clear any server-side response caches
    fn invalidate_cache(&self);
}
