// src/server/collection.rs

//! Ordered collection of package servers
//!
//! Aggregates servers in priority order and provides the fallback-ordered
//! operations the service layer builds on: de-duplicating catalog search,
//! version resolution, the central `fetch_package` primitive with its
//! short-lived resolution cache, dependency resolution, binary download
//! and bulk pull.
//!
//! "Not found" is never an error on these paths: a specification no server
//! resolves yields an empty item, and per-server transport failures are
//! logged and treated as "this server has no answer".

use crate::automation::AutomationInterface;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::model::{CatalogEntry, PackageItem, PackageSpec, PackageVersion};
use crate::server::{ChecksumMode, PackageServer, SharedServer};
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Priority-ordered package servers with short-lived result caches
pub struct PackageServerCollection {
    servers: Vec<SharedServer>,
    /// Resolution results keyed by consumer context + full spec tuple;
    /// entries always carry resolved metadata
    resolution_cache: Mutex<HashMap<String, PackageItem>>,
}

fn fetch_cache_key(project: &str, plc: &str, spec: &PackageSpec) -> String {
    format!("{project}:{plc}:{}", spec.cache_key())
}

impl PackageServerCollection {
    /// Create a collection; order is priority order for fallback
    pub fn new(servers: Vec<SharedServer>) -> Self {
        Self {
            servers,
            resolution_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn servers(&self) -> &[SharedServer] {
        &self.servers
    }

    /// Look a server up by its stable name
    pub fn get(&self, name: &str) -> Option<SharedServer> {
        self.servers.iter().find(|s| s.name() == name).cloned()
    }

    fn connected_servers(&self) -> Vec<SharedServer> {
        self.servers
            .iter()
            .filter(|s| s.connected())
            .cloned()
            .collect()
    }

    /// Clear all short-lived caches, here and on every member server
    pub fn invalidate_cache(&self) {
        self.resolution_cache.lock().unwrap().clear();
        for server in &self.servers {
            server.invalidate_cache();
        }
        debug!("Invalidated resolution caches");
    }

    /// Authenticate against one server and drop stale cached results
    pub async fn login(&self, server_name: &str, username: &str, password: &str) -> Result<()> {
        let server = self.get(server_name).ok_or_else(|| {
            Error::ValidationError(format!("Unknown package server '{server_name}'"))
        })?;
        server.login(username, password).await?;
        self.invalidate_cache();
        Ok(())
    }

    /// Log out of one server and drop stale cached results
    pub async fn logout(&self, server_name: &str) -> Result<()> {
        let server = self.get(server_name).ok_or_else(|| {
            Error::ValidationError(format!("Unknown package server '{server_name}'"))
        })?;
        server.logout().await?;
        self.invalidate_cache();
        Ok(())
    }

    /// Lazy catalog search across all connected servers
    ///
    /// Iterates servers in priority order, paginating each with
    /// `per_page`, de-duplicating by package name across the whole
    /// sequence, and ending once `max_results` distinct names have been
    /// yielded or every server is exhausted. Each call restarts from the
    /// beginning. Per-server failures end that server's contribution and
    /// are logged, not surfaced.
    pub fn search(
        &self,
        filter: Option<String>,
        max_results: Option<usize>,
        per_page: usize,
    ) -> BoxStream<'static, CatalogEntry> {
        struct SearchState {
            servers: Vec<SharedServer>,
            filter: Option<String>,
            per_page: usize,
            max_results: Option<usize>,
            server_idx: usize,
            page: usize,
            yielded: usize,
            seen: HashSet<String>,
            buffer: VecDeque<CatalogEntry>,
            done: bool,
        }

        let state = SearchState {
            servers: self.connected_servers(),
            filter,
            per_page: per_page.max(1),
            max_results,
            server_idx: 0,
            page: 0,
            yielded: 0,
            seen: HashSet::new(),
            buffer: VecDeque::new(),
            done: false,
        };

        Box::pin(futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(entry) = st.buffer.pop_front() {
                    return Some((entry, st));
                }
                if st.done {
                    return None;
                }
                let Some(server) = st.servers.get(st.server_idx).cloned() else {
                    st.done = true;
                    continue;
                };

                match server
                    .search(st.filter.as_deref(), st.page, st.per_page)
                    .await
                {
                    Ok((entries, has_more)) => {
                        st.page += 1;
                        for entry in entries {
                            let at_max = st.max_results.is_some_and(|max| st.yielded >= max);
                            if at_max {
                                st.done = true;
                                break;
                            }
                            // A name yielded once is never yielded again,
                            // even from a later server
                            if st.seen.insert(entry.name.clone()) {
                                st.yielded += 1;
                                st.buffer.push_back(entry);
                            }
                        }
                        if st.max_results.is_some_and(|max| st.yielded >= max) {
                            st.done = true;
                        } else if !has_more {
                            st.server_idx += 1;
                            st.page = 0;
                        }
                    }
                    Err(e) => {
                        warn!("Search on server '{}' failed: {}", server.name(), e);
                        st.server_idx += 1;
                        st.page = 0;
                    }
                }
            }
        }))
    }

    /// First non-empty resolution across servers in priority order
    pub async fn resolve_version(&self, spec: &PackageSpec) -> Option<PackageVersion> {
        for server in self.connected_servers() {
            match server.resolve_version(spec).await {
                Ok(Some(version)) => {
                    debug!(
                        "Resolved '{}' to {} on server '{}'",
                        spec.name,
                        version.version,
                        server.name()
                    );
                    return Some(version);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Server '{}' failed to resolve '{}': {}",
                        server.name(),
                        spec.name,
                        e
                    );
                }
            }
        }
        None
    }

    /// Resolve "used" and "latest" metadata for a spec on one server
    async fn resolve_on_server(
        &self,
        server: &dyn PackageServer,
        project: &str,
        plc: &str,
        spec: &PackageSpec,
        automation: Option<&dyn AutomationInterface>,
    ) -> Result<(Option<PackageVersion>, Option<PackageVersion>)> {
        let mut used = server.resolve_version(spec).await?;

        // Wildcard-to-concrete promotion: an unconstrained version with a
        // consumer context resolves to whatever is effectively installed
        if spec.version.is_none() && !plc.is_empty() {
            if let Some(automation) = automation {
                if let Some(effective) = automation
                    .resolve_effective_version(project, plc, &spec.name)
                    .await?
                {
                    let concrete = spec.clone().with_version(effective);
                    if let Some(resolved) = server.resolve_version(&concrete).await? {
                        used = Some(resolved);
                    }
                }
            }
        }

        // Latest available, independent of what is referenced
        let mut latest_spec = spec.clone();
        latest_spec.version = None;
        if let Some(u) = &used {
            latest_spec.branch.get_or_insert_with(|| u.branch.clone());
            latest_spec.target.get_or_insert_with(|| u.target.clone());
            latest_spec
                .configuration
                .get_or_insert_with(|| u.configuration.clone());
        }
        let update = server.resolve_version(&latest_spec).await?;

        Ok((used, update))
    }

    /// Resolution without metadata: first server with any answer wins
    async fn fetch_single(
        &self,
        project: &str,
        plc: &str,
        spec: &PackageSpec,
        automation: Option<&dyn AutomationInterface>,
        pinned_server: Option<SharedServer>,
    ) -> PackageItem {
        let mut item = PackageItem::new(project, plc, spec.clone());

        let servers = match pinned_server {
            Some(server) => vec![server],
            None => self.connected_servers(),
        };

        for server in servers {
            match self
                .resolve_on_server(&*server, project, plc, spec, automation)
                .await
            {
                Ok((None, None)) => continue,
                Ok((used, update)) => {
                    // A package may be locally pinned without being in any
                    // catalog; whatever resolved is kept
                    let distributor = used
                        .as_ref()
                        .or(update.as_ref())
                        .map(|v| v.distributor.clone())
                        .unwrap_or_default();
                    item.used = used;
                    item.update = update;
                    match server.get_package(&distributor, &spec.name).await {
                        Ok(catalog) => item.catalog = catalog,
                        Err(e) => {
                            warn!(
                                "Catalog summary for '{}' on '{}' failed: {}",
                                spec.name,
                                server.name(),
                                e
                            );
                        }
                    }
                    item.server = Some(server);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Server '{}' failed to resolve '{}': {}",
                        server.name(),
                        spec.name,
                        e
                    );
                }
            }
        }

        item
    }

    /// The central resolution primitive
    ///
    /// Resolves a specification for a consumer context, promoting wildcard
    /// versions to the effectively installed version when an automation
    /// interface is supplied, and independently resolving the latest
    /// available version. With `include_metadata` the item's dependencies
    /// are resolved one level deep and the result is cached; repeated
    /// identical calls are served from the cache until invalidation.
    ///
    /// An unresolvable specification yields an item without a server, not
    /// an error; callers check for absence of metadata.
    pub async fn fetch_package(
        &self,
        project: &str,
        plc: &str,
        spec: &PackageSpec,
        include_metadata: bool,
        automation: Option<&dyn AutomationInterface>,
        pinned_server: Option<SharedServer>,
    ) -> PackageItem {
        let key = fetch_cache_key(project, plc, spec);
        if include_metadata {
            if let Some(cached) = self.resolution_cache.lock().unwrap().get(&key) {
                debug!("Resolution cache hit for {key}");
                return cached.clone();
            }
        }

        let mut item = self
            .fetch_single(project, plc, spec, automation, pinned_server)
            .await;

        if include_metadata && item.is_resolved() {
            // Full metadata includes the license payloads
            if let (Some(server), Some(used)) = (&item.server, &item.used) {
                match server.get_package_version(&used.spec(), true).await {
                    Ok(Some(full)) => item.used = Some(full),
                    Ok(None) => {}
                    Err(e) => warn!(
                        "Full metadata for '{}' on '{}' failed: {}",
                        spec.name,
                        server.name(),
                        e
                    ),
                }
            }
            item.dependencies = Some(self.resolve_dependencies(&item, automation).await);
            self.resolution_cache
                .lock()
                .unwrap()
                .insert(key, item.clone());
        }

        item
    }

    /// Resolve an item's direct dependencies across all connected servers
    ///
    /// A dependency that resolves on no server is skipped with a warning;
    /// this is deliberate best-effort, not a hard failure.
    pub async fn resolve_dependencies(
        &self,
        item: &PackageItem,
        automation: Option<&dyn AutomationInterface>,
    ) -> Vec<PackageItem> {
        let Some(metadata) = item.used.as_ref().or(item.update.as_ref()) else {
            return Vec::new();
        };

        let mut resolved = Vec::new();
        for dep in &metadata.dependencies {
            let dep_item = self
                .fetch_single(&item.project, &item.plc, dep, automation, None)
                .await;
            if dep_item.is_resolved() {
                resolved.push(dep_item);
            } else {
                warn!(
                    "Dependency '{}' of '{}' resolves on no server, skipping",
                    dep.name,
                    item.name()
                );
            }
        }
        resolved
    }

    /// Download an item's pinned binary, preferring its bound server
    ///
    /// Falls back to every other connected server; failure is reported by
    /// a `None` return and a warning naming all servers tried.
    pub async fn download(
        &self,
        item: &PackageItem,
        checksum: ChecksumMode,
        dest_dir: &Path,
    ) -> Option<PathBuf> {
        let version = item.pinned()?;

        let mut servers: Vec<SharedServer> = Vec::new();
        if let Some(bound) = &item.server {
            servers.push(bound.clone());
        }
        for server in self.connected_servers() {
            if !servers.iter().any(|s| s.name() == server.name()) {
                servers.push(server);
            }
        }

        let mut tried = Vec::new();
        for server in servers {
            match server
                .download_package_version(version, checksum, dest_dir)
                .await
            {
                Ok(path) => {
                    info!(
                        "Downloaded '{}' {} from server '{}'",
                        version.name,
                        version.version,
                        server.name()
                    );
                    return Some(path);
                }
                Err(e) => {
                    debug!(
                        "Download of '{}' from '{}' failed: {}",
                        version.name,
                        server.name(),
                        e
                    );
                    tried.push(server.name().to_string());
                }
            }
        }

        warn!(
            "Could not download '{}' {} from any server (tried: {})",
            version.name,
            version.version,
            tried.join(", ")
        );
        None
    }

    /// Bulk download of every package declared in a configuration
    ///
    /// Servers are visited in priority order; a package satisfied by an
    /// earlier server is skipped on later ones (wildcard-aware identity).
    /// Individual failures do not abort the batch; one aggregate error
    /// reports the count afterwards.
    pub async fn pull(
        &self,
        config: &Configuration,
        skip_internal: bool,
        filter: Option<&[String]>,
        checksum: ChecksumMode,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let mut handled: Vec<PackageSpec> = Vec::new();
        let mut downloaded = Vec::new();
        let mut failed_downloads = 0usize;
        let mut failed_resolutions = 0usize;

        for server in self.connected_servers() {
            for (project, plc, package) in config.packages() {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let spec = package.spec();
                if let Some(names) = filter {
                    if !names.iter().any(|n| n == &spec.name) {
                        continue;
                    }
                }
                if skip_internal && config.provides(&spec.name) {
                    debug!("Skipping provided package '{}'", spec.name);
                    continue;
                }
                if handled.iter().any(|h| h.matches(&spec)) {
                    continue;
                }

                match server.get_package_version(&spec, false).await {
                    Ok(Some(version)) => {
                        // Resolution chose this server; a failed download is
                        // reported, not retried on lower-priority servers
                        handled.push(version.spec());
                        match server
                            .download_package_version(&version, checksum, dest_dir)
                            .await
                        {
                            Ok(path) => {
                                info!(
                                    "Pulled '{}' {} for {}/{}",
                                    version.name, version.version, project.name, plc.name
                                );
                                downloaded.push(path);
                            }
                            Err(e) => {
                                warn!(
                                    "Failed to pull '{}' {}: {}",
                                    version.name, version.version, e
                                );
                                failed_downloads += 1;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("'{}' is not on server '{}'", spec.name, server.name());
                    }
                    Err(e) => {
                        warn!(
                            "Server '{}' failed for '{}': {}",
                            server.name(),
                            spec.name,
                            e
                        );
                        failed_resolutions += 1;
                    }
                }
            }
        }

        let failed = failed_downloads + failed_resolutions;
        if failed > 0 {
            return Err(Error::AggregateError {
                failed,
                total: handled.len() + failed_resolutions,
                context: "packages".to_string(),
            });
        }
        Ok(downloaded)
    }
}
