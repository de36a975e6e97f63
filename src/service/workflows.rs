// src/service/workflows.rs

//! Add, update, remove, restore and set-version workflows
//!
//! Each workflow applies the same sequence per package: resolve, download
//! (or accept what is already present), install, update the project
//! reference, rewrite the configuration entry, persist. Validation
//! failures are raised immediately; per-package download and resolution
//! failures are collected and surfaced once as an aggregate error after
//! every item has been attempted. No persist call begins after
//! cancellation has been observed.

use crate::config::ConfigPackage;
use crate::error::{Error, Result};
use crate::model::{ItemKey, PackageItem, PackageSpec};
use crate::server::ChecksumMode;
use crate::service::{AffectedCache, PackageService};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for the add/update workflows
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Download even when the host reports the package installed
    pub force_download: bool,
    /// Whether dependencies become explicit project references too
    pub include_dependencies: bool,
    pub skip_download: bool,
    pub skip_install: bool,
    /// Whether project references are touched at all
    pub update_plc: bool,
    /// Overrides the service's binary cache directory
    pub download_path: Option<PathBuf>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            force_download: false,
            include_dependencies: true,
            skip_download: false,
            skip_install: false,
            update_plc: true,
            download_path: None,
        }
    }
}

/// Options for the restore workflow
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub add: AddOptions,
    /// Whether packages produced by this configuration are restored too
    /// (they are never downloaded, only referenced)
    pub include_provided: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            add: AddOptions::default(),
            include_provided: true,
        }
    }
}

/// Narrows an update to matching packages and overrides identity fields
#[derive(Debug, Clone, Default)]
pub struct UpdateFilter {
    /// Exact package name to match
    pub name: Option<String>,
    /// Framework tag to match
    pub framework: Option<String>,
    pub version: Option<String>,
    pub branch: Option<String>,
    pub target: Option<String>,
    pub configuration: Option<String>,
}

impl UpdateFilter {
    fn matches(&self, item: &PackageItem) -> bool {
        if let Some(name) = &self.name {
            if item.name() != name {
                return false;
            }
        }
        if let Some(framework) = &self.framework {
            let tagged = item
                .used
                .as_ref()
                .or(item.update.as_ref())
                .and_then(|v| v.framework.as_ref())
                .is_some_and(|f| f == framework);
            if !tagged {
                return false;
            }
        }
        true
    }
}

/// Options for the update workflow
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub add: AddOptions,
    /// Empty means "update everything that has a newer version"
    pub filters: Vec<UpdateFilter>,
}

/// Options for the set-version workflow
#[derive(Debug, Clone, Default)]
pub struct SetVersionOptions {
    /// Restrict to one project; `None` targets all
    pub project: Option<String>,
    /// Restrict to one PLC; `None` targets all
    pub plc: Option<String>,
    /// Re-pin packages sharing a framework tag with the targeted PLCs
    pub sync_framework_packages: bool,
    /// Preferred identity overrides for synchronized packages
    pub branch: Option<String>,
    pub target: Option<String>,
    pub configuration: Option<String>,
    /// Remove all existing references before re-adding the synchronized
    /// set; only valid together with `sync_framework_packages`
    pub purge_packages: bool,
}

impl PackageService {
    /// Add or update packages, including their dependency closure
    ///
    /// Returns the packages actually added with their pinned
    /// specifications. Individual download, install and resolution
    /// failures are collected; one aggregate error is raised after all
    /// items have been attempted.
    pub async fn add_packages(
        &self,
        items: &[PackageItem],
        options: &AddOptions,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        let mut cache = AffectedCache::new();
        self.add_packages_with_cache(items, options, &mut cache, token)
            .await
    }

    /// `add_packages` with a caller-owned closure cache
    ///
    /// Sharing one cache across several calls de-duplicates work across an
    /// entire multi-PLC operation.
    pub async fn add_packages_with_cache(
        &self,
        items: &[PackageItem],
        options: &AddOptions,
        cache: &mut AffectedCache,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let affected = self.affected_packages(items, true, cache, token).await?;

        // Inputs the closure discarded failed resolution
        let mut failed = 0usize;
        for item in items {
            if !cache.contains_key(&item.key()) {
                warn!("Package '{}' could not be resolved", item.name());
                failed += 1;
            }
        }
        let total = affected.len() + failed;

        self.copy_runtime_licenses(&affected).await?;

        if let Some(automation) = &self.automation {
            automation.close_all_related_windows(&affected).await?;
        }

        // Download, then install what was newly downloaded
        let mut downloaded: HashMap<ItemKey, PathBuf> = HashMap::new();
        if !options.skip_download {
            let dest_dir = options
                .download_path
                .clone()
                .unwrap_or_else(|| self.cache_dir.clone());

            for item in &affected {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let installed = match self.automation() {
                    Some(automation) => automation.is_package_installed(item).await,
                    None => false,
                };
                if installed && !options.force_download {
                    debug!("'{}' already present, skipping download", item.name());
                    continue;
                }
                match self
                    .servers
                    .download(item, ChecksumMode::Verify, &dest_dir)
                    .await
                {
                    Some(path) => {
                        downloaded.insert(item.key(), path);
                    }
                    None => failed += 1,
                }
            }

            if !options.skip_install {
                if let Some(automation) = &self.automation {
                    for item in &affected {
                        if token.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        let Some(path) = downloaded.get(&item.key()) else {
                            continue;
                        };
                        if let Err(e) = automation.install_package(item, path).await {
                            warn!("Failed to install '{}': {}", item.name(), e);
                            failed += 1;
                        }
                    }
                }
            }
        }

        // Reference the targeted packages, or the whole closure when
        // dependencies must become explicit references as well
        let targets: Vec<PackageItem> = if options.include_dependencies {
            affected.clone()
        } else {
            items
                .iter()
                .filter_map(|item| cache.get(&item.key()).cloned())
                .collect()
        };

        if options.update_plc {
            if let Some(automation) = &self.automation {
                for item in &targets {
                    if token.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    if item.project.is_empty() || item.plc.is_empty() {
                        continue;
                    }
                    automation.add_package(item).await?;
                }
            }
        }

        // Pin the resolved versions into the configuration tree
        {
            let mut config = self.config.lock().await;
            for item in &targets {
                if item.project.is_empty() || item.plc.is_empty() {
                    continue;
                }
                let Some(version) = item.pinned() else { continue };
                config.upsert_package(
                    &item.project,
                    &item.plc,
                    ConfigPackage::from_version(version, item.options.clone()),
                )?;
            }
        }

        self.persist(token).await?;

        if failed > 0 {
            return Err(Error::AggregateError {
                failed,
                total,
                context: "packages".to_string(),
            });
        }
        Ok(targets)
    }

    /// Remove package references, optionally uninstalling binaries
    ///
    /// Removal never cascades into dependencies. Packages must be named
    /// and declared in the configuration; anything else is a validation
    /// failure before any state changes.
    pub async fn remove_packages(
        &self,
        items: &[PackageItem],
        uninstall: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        for item in items {
            if item.name().is_empty() {
                return Err(Error::ValidationError(
                    "Cannot remove a package without a name".to_string(),
                ));
            }
        }
        {
            let config = self.config.lock().await;
            for item in items {
                if !config.has_package(&item.project, &item.plc, item.name()) {
                    return Err(Error::ValidationError(format!(
                        "Package '{}' is not declared in {}/{}",
                        item.name(),
                        item.project,
                        item.plc
                    )));
                }
            }
        }

        let mut cache = AffectedCache::new();
        let mut targets = self.affected_packages(items, false, &mut cache, token).await?;
        // A declared package no server resolves can still be removed
        for item in items {
            if !cache.contains_key(&item.key()) {
                targets.push(item.clone());
            }
        }

        if let Some(automation) = &self.automation {
            automation.close_all_related_windows(&targets).await?;
        }

        for item in &targets {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(automation) = &self.automation {
                automation.remove_package(item, uninstall, false).await?;
            }
            let key = item.key();
            self.used.lock().await.cache.retain(|c| c.key() != key);
            self.config
                .lock()
                .await
                .remove_package(&item.project, &item.plc, item.name());
            info!("Removed '{}' from {}/{}", item.name(), item.project, item.plc);
        }

        self.persist(token).await
    }

    /// Reinstall everything the configuration declares
    ///
    /// Packages provided by a project inside this configuration are never
    /// downloaded, only referenced.
    pub async fn restore_packages(
        &self,
        options: &RestoreOptions,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        let used = self
            .retrieve_used_packages(None, false, &[], token)
            .await?;
        let config = self.config.lock().await.clone();

        let (provided, installable): (Vec<_>, Vec<_>) = used
            .into_iter()
            .partition(|item| config.provides(item.name()));

        let mut restored = Vec::new();
        let mut failed = 0usize;
        let mut total = 0usize;

        match self.add_packages(&installable, &options.add, token).await {
            Ok(mut items) => {
                total += installable.len();
                restored.append(&mut items);
            }
            Err(Error::AggregateError { failed: f, total: t, .. }) => {
                failed += f;
                total += t;
            }
            Err(e) => return Err(e),
        }

        if options.include_provided {
            let mut provided_options = options.add.clone();
            provided_options.skip_download = true;
            match self
                .add_packages(&provided, &provided_options, token)
                .await
            {
                Ok(mut items) => {
                    total += provided.len();
                    restored.append(&mut items);
                }
                Err(Error::AggregateError { failed: f, total: t, .. }) => {
                    failed += f;
                    total += t;
                }
                Err(e) => return Err(e),
            }
        }

        let mut seen = HashSet::new();
        restored.retain(|item| {
            seen.insert((
                item.key(),
                item.pinned().map(|v| v.version.clone()),
            ))
        });

        if failed > 0 {
            return Err(Error::AggregateError {
                failed,
                total,
                context: "dependencies".to_string(),
            });
        }
        Ok(restored)
    }

    /// Move used packages to their latest available versions
    ///
    /// Filters narrow the update by package name or framework tag and may
    /// override identity fields per matched entry; resolution is redone
    /// from scratch for every target.
    pub async fn update_packages(
        &self,
        options: &UpdateOptions,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        let used = self
            .retrieve_used_packages(None, false, &[], token)
            .await?;

        let mut targets = Vec::new();
        for item in used {
            let Some(update) = item.update.as_ref() else {
                debug!("'{}' has no catalog entry to update to", item.name());
                continue;
            };

            let filter = if options.filters.is_empty() {
                None
            } else {
                match options.filters.iter().find(|f| f.matches(&item)) {
                    Some(found) => Some(found),
                    None => continue,
                }
            };

            let mut spec = update.spec();
            if let Some(filter) = filter {
                if let Some(version) = &filter.version {
                    spec.version = Some(version.clone());
                }
                if let Some(branch) = &filter.branch {
                    spec.branch = Some(branch.clone());
                }
                if let Some(target) = &filter.target {
                    spec.target = Some(target.clone());
                }
                if let Some(configuration) = &filter.configuration {
                    spec.configuration = Some(configuration.clone());
                }
            }

            // A bare item with no metadata forces re-resolution
            let mut target = PackageItem::new(&item.project, &item.plc, spec);
            target.options = item.options.clone();
            targets.push(target);
        }

        // Stale resolutions must not satisfy the re-resolution
        self.servers.invalidate_cache();

        self.add_packages(&targets, &options.add, token).await
    }

    /// Set the version of the targeted PLC artifacts
    ///
    /// With `sync_framework_packages`, every used package sharing a
    /// framework tag with the targeted PLCs is re-pinned to the same
    /// version: server-confirmed matches are installed normally, while an
    /// unconfirmed pin is written to the configuration only when no
    /// interactive host is attached.
    pub async fn set_package_version(
        &self,
        version: &str,
        options: &SetVersionOptions,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        if options.purge_packages && !options.sync_framework_packages {
            return Err(Error::ValidationError(
                "purge_packages is only valid together with sync_framework_packages".to_string(),
            ));
        }

        let targets: Vec<(String, String, Option<String>)> = {
            let config = self.config.lock().await;
            config
                .projects
                .iter()
                .filter(|project| {
                    options
                        .project
                        .as_deref()
                        .is_none_or(|name| name == project.name)
                })
                .flat_map(|project| {
                    project
                        .plcs
                        .iter()
                        .filter(|plc| {
                            options.plc.as_deref().is_none_or(|name| name == plc.name)
                        })
                        .map(move |plc| {
                            (project.name.clone(), plc.name.clone(), plc.framework.clone())
                        })
                })
                .collect()
        };
        if targets.is_empty() {
            return Err(Error::ValidationError(
                "No project/PLC matches the given filter".to_string(),
            ));
        }

        {
            let mut config = self.config.lock().await;
            for (project, plc, _) in &targets {
                if let Some(plc) = config.find_plc_mut(project, plc) {
                    plc.version = Some(version.to_string());
                }
            }
        }
        if let Some(automation) = &self.automation {
            for (project, plc, _) in &targets {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                automation.set_plc_version(project, plc, version).await?;
            }
        }

        let mut synced = Vec::new();
        if options.sync_framework_packages {
            let frameworks: HashSet<String> = targets
                .iter()
                .filter_map(|(_, _, framework)| framework.clone())
                .collect();

            let used = self
                .retrieve_used_packages(None, false, &[], token)
                .await?;
            let framework_packages: Vec<PackageItem> = used
                .into_iter()
                .filter(|item| {
                    item.used
                        .as_ref()
                        .or(item.update.as_ref())
                        .and_then(|v| v.framework.as_ref())
                        .is_some_and(|f| frameworks.contains(f))
                })
                .collect();

            if options.purge_packages {
                self.remove_packages(&framework_packages, false, token)
                    .await?;
            }

            // One cache across the whole pass for global de-duplication
            let mut cache = AffectedCache::new();
            let mut confirmed = Vec::new();
            for item in framework_packages {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let mut spec = item.config.clone();
                spec.version = Some(version.to_string());
                if let Some(branch) = &options.branch {
                    spec.branch = Some(branch.clone());
                }
                if let Some(target) = &options.target {
                    spec.target = Some(target.clone());
                }
                if let Some(configuration) = &options.configuration {
                    spec.configuration = Some(configuration.clone());
                }

                let probe = self
                    .servers
                    .fetch_package(&item.project, &item.plc, &spec, false, self.automation(), None)
                    .await;

                if probe.used.as_ref().is_some_and(|u| u.version == version) {
                    let mut target = PackageItem::new(&item.project, &item.plc, spec);
                    target.options = item.options.clone();
                    confirmed.push(target);
                } else if self.automation().is_some_and(|a| a.interactive()) {
                    // An interactive host cannot reference a package that
                    // does not verifiably exist
                    warn!(
                        "Skipping '{}': version {} is not confirmed by any server",
                        item.name(),
                        version
                    );
                } else {
                    info!(
                        "Pinning '{}' to unconfirmed version {}",
                        item.name(),
                        version
                    );
                    let declared = spec_to_config(&spec, item.options.clone());
                    self.config
                        .lock()
                        .await
                        .upsert_package(&item.project, &item.plc, declared)?;
                }
            }

            synced = self
                .add_packages_with_cache(&confirmed, &AddOptions::default(), &mut cache, token)
                .await?;
        }

        self.persist(token).await?;
        Ok(synced)
    }

    /// Stage runtime license artifacts into the host's license store
    ///
    /// Keyed by content hash, so artifacts already staged are skipped.
    async fn copy_runtime_licenses(&self, items: &[PackageItem]) -> Result<()> {
        let Some(automation) = &self.automation else {
            return Ok(());
        };
        let dir = automation.licenses_path();

        for item in items {
            let Some(version) = item.pinned() else { continue };
            let Some(license) = &version.license_binary else {
                continue;
            };

            let digest = hex::encode(Sha256::digest(license));
            let dest = dir.join(&version.distributor).join(format!("{digest}.license"));
            if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                debug!("License for '{}' already staged", item.name());
                continue;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::IoError(format!(
                        "Failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            tokio::fs::write(&dest, license).await.map_err(|e| {
                Error::IoError(format!("Failed to write {}: {e}", dest.display()))
            })?;
            info!("Staged runtime license for '{}'", item.name());
        }
        Ok(())
    }
}

fn spec_to_config(spec: &PackageSpec, options: Option<crate::model::PackageOptions>) -> ConfigPackage {
    ConfigPackage {
        name: spec.name.clone(),
        distributor: spec.distributor.clone(),
        version: spec.version.clone(),
        branch: spec.branch.clone(),
        target: spec.target.clone(),
        configuration: spec.configuration.clone(),
        options,
    }
}
