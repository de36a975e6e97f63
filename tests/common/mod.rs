// tests/common/mod.rs

//! Shared fixtures and test doubles for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use depot::{
    CatalogEntry, ChecksumMode, ConfigPackage, ConfigPlc, ConfigProject, Configuration,
    InMemoryPackageServer, PackageServer, PackageSpec, PackageVersion, Result,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Enable log output for a test run when RUST_LOG is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Build concrete resolved metadata for a fixture package.
pub fn version(name: &str, ver: &str) -> PackageVersion {
    PackageVersion {
        name: name.to_string(),
        distributor: "acme".to_string(),
        version: ver.to_string(),
        branch: "main".to_string(),
        target: "TC3.1".to_string(),
        configuration: "Release".to_string(),
        ..PackageVersion::default()
    }
}

pub fn version_with_deps(name: &str, ver: &str, deps: &[&str]) -> PackageVersion {
    let mut v = version(name, ver);
    v.dependencies = deps
        .iter()
        .map(|d| PackageSpec::new(*d).with_version(ver))
        .collect();
    v
}

/// A server whose catalog holds the given versions, each with a binary.
pub fn catalog_server(name: &str, versions: &[PackageVersion]) -> Arc<InMemoryPackageServer> {
    let server = Arc::new(InMemoryPackageServer::new(name));
    for v in versions {
        let payload = format!("{}-{}", v.name, v.version).into_bytes();
        server.insert_with_binary(v.clone(), payload);
    }
    server
}

/// A configuration with one project and one PLC declaring the given packages.
pub fn sample_config(packages: &[&str]) -> Configuration {
    Configuration {
        solution: Some("Plant.sln".to_string()),
        projects: vec![ConfigProject {
            name: "Plant".to_string(),
            plcs: vec![ConfigPlc {
                name: "Main".to_string(),
                packages: packages
                    .iter()
                    .map(|name| ConfigPackage {
                        name: name.to_string(),
                        ..ConfigPackage::default()
                    })
                    .collect(),
                ..ConfigPlc::default()
            }],
            modules: Vec::new(),
        }],
    }
}

/// Delegating server that counts calls, for cache and dedup assertions.
pub struct CountingServer {
    inner: Arc<InMemoryPackageServer>,
    resolve_calls: AtomicUsize,
    search_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl CountingServer {
    pub fn wrap(inner: Arc<InMemoryPackageServer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            resolve_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        })
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageServer for CountingServer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn url_base(&self) -> &str {
        self.inner.url_base()
    }

    fn connected(&self) -> bool {
        self.inner.connected()
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.inner.login(username, password).await
    }

    async fn search(
        &self,
        filter: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<CatalogEntry>, bool)> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(filter, page, per_page).await
    }

    async fn resolve_version(&self, spec: &PackageSpec) -> Result<Option<PackageVersion>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_version(spec).await
    }

    async fn get_package_version(
        &self,
        spec: &PackageSpec,
        include_binary: bool,
    ) -> Result<Option<PackageVersion>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_package_version(spec, include_binary).await
    }

    async fn get_package(&self, distributor: &str, name: &str) -> Result<Option<CatalogEntry>> {
        self.inner.get_package(distributor, name).await
    }

    async fn download_package_version(
        &self,
        version: &PackageVersion,
        checksum: ChecksumMode,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .download_package_version(version, checksum, dest_dir)
            .await
    }

    fn invalidate_cache(&self) {
        self.inner.invalidate_cache()
    }
}
