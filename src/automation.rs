// src/automation.rs

//! Automation interface contract
//!
//! The automation interface is the host-specific installer: it adds and
//! removes library references inside a target project, installs binaries
//! into the host platform, and persists project files. The client only
//! calls this contract; the interactive implementation lives with the host
//! integration. [`HeadlessAutomation`] is the bundled non-interactive
//! implementation backed by a plain directory tree.

use crate::error::{Error, Result};
use crate::model::PackageItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Host-side install operations consumed by the package service
#[async_trait]
pub trait AutomationInterface: Send + Sync {
    /// Whether a host UI is attached
    ///
    /// An interactive host cannot reference a package that does not
    /// verifiably exist, which restricts unconfirmed version pinning.
    fn interactive(&self) -> bool {
        true
    }

    /// Root of the solution the automation interface operates on
    fn solution_path(&self) -> PathBuf;

    /// Directory runtime license artifacts are staged into
    fn licenses_path(&self) -> PathBuf;

    async fn is_package_installed(&self, item: &PackageItem) -> bool;

    /// Install a downloaded binary into the host platform
    async fn install_package(&self, item: &PackageItem, binary_path: &Path) -> Result<()>;

    /// Remove the installed binary; returns whether anything was removed
    async fn uninstall_package(&self, item: &PackageItem) -> Result<bool>;

    /// Add a library reference to the consuming project
    async fn add_package(&self, item: &PackageItem) -> Result<()>;

    /// Remove the library reference, optionally uninstalling the binary
    async fn remove_package(&self, item: &PackageItem, uninstall: bool, force: bool) -> Result<()>;

    /// Resolve the effective installed version behind a placeholder reference
    async fn resolve_effective_version(
        &self,
        project: &str,
        plc: &str,
        placeholder: &str,
    ) -> Result<Option<String>>;

    /// Close any host windows holding a lock on the given packages
    async fn close_all_related_windows(&self, items: &[PackageItem]) -> Result<()>;

    /// Set the version field of a PLC project file
    async fn set_plc_version(&self, project: &str, plc: &str, version: &str) -> Result<()>;

    /// Persist all open project files
    async fn save_all(&self) -> Result<()>;
}

/// Non-interactive automation interface backed by a directory tree
///
/// Installed libraries live under `<root>/.libraries/<distributor>/`,
/// license artifacts under `<root>/.licenses/`. Reference bookkeeping is
/// left to the configuration document, so the reference operations are
/// no-ops here.
pub struct HeadlessAutomation {
    root: PathBuf,
}

impl HeadlessAutomation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn library_path(&self, item: &PackageItem) -> Option<PathBuf> {
        let version = item.pinned()?;
        Some(
            self.root
                .join(".libraries")
                .join(&version.distributor)
                .join(version.binary_file_name()),
        )
    }
}

#[async_trait]
impl AutomationInterface for HeadlessAutomation {
    fn interactive(&self) -> bool {
        false
    }

    fn solution_path(&self) -> PathBuf {
        self.root.clone()
    }

    fn licenses_path(&self) -> PathBuf {
        self.root.join(".licenses")
    }

    async fn is_package_installed(&self, item: &PackageItem) -> bool {
        match self.library_path(item) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    async fn install_package(&self, item: &PackageItem, binary_path: &Path) -> Result<()> {
        let dest = self.library_path(item).ok_or_else(|| {
            Error::ValidationError(format!(
                "Cannot install '{}' without resolved metadata",
                item.name()
            ))
        })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        tokio::fs::copy(binary_path, &dest).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to install {} to {}: {e}",
                binary_path.display(),
                dest.display()
            ))
        })?;
        info!("Installed '{}' to {}", item.name(), dest.display());
        Ok(())
    }

    async fn uninstall_package(&self, item: &PackageItem) -> Result<bool> {
        let Some(path) = self.library_path(item) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Uninstalled '{}'", item.name());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::IoError(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    async fn add_package(&self, item: &PackageItem) -> Result<()> {
        // References are tracked by the configuration document
        debug!("Referenced '{}' in {}/{}", item.name(), item.project, item.plc);
        Ok(())
    }

    async fn remove_package(&self, item: &PackageItem, uninstall: bool, _force: bool) -> Result<()> {
        debug!(
            "Dereferenced '{}' in {}/{}",
            item.name(),
            item.project,
            item.plc
        );
        if uninstall {
            self.uninstall_package(item).await?;
        }
        Ok(())
    }

    async fn resolve_effective_version(
        &self,
        _project: &str,
        _plc: &str,
        _placeholder: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn close_all_related_windows(&self, _items: &[PackageItem]) -> Result<()> {
        Ok(())
    }

    async fn set_plc_version(&self, _project: &str, _plc: &str, _version: &str) -> Result<()> {
        Ok(())
    }

    async fn save_all(&self) -> Result<()> {
        Ok(())
    }
}
