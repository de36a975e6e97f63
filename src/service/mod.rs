// src/service/mod.rs

//! Package service
//!
//! The orchestration layer on top of the server collection: retrieves the
//! "used" and "available" package sets for a configuration, computes
//! affected-package closures, and drives the add, update, remove, restore
//! and set-version workflows.
//!
//! The two retrieval paths are each guarded by their own mutex, so at most
//! one traversal of each kind runs at a time per service instance;
//! concurrent callers are serialized, not rejected.

mod closure;
mod workflows;

pub use closure::AffectedCache;
pub use workflows::{
    AddOptions, RestoreOptions, SetVersionOptions, UpdateFilter, UpdateOptions,
};

use crate::automation::AutomationInterface;
use crate::config::{ConfigStore, Configuration};
use crate::error::{Error, Result};
use crate::model::{CatalogEntry, PackageItem};
use crate::server::PackageServerCollection;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay absorbing rapid caller-driven search-text changes
const SEARCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Incremental cursor over the collection's catalog search
struct AvailableState {
    term: Option<String>,
    cursor: Option<BoxStream<'static, CatalogEntry>>,
    cache: Vec<CatalogEntry>,
    exhausted: bool,
}

struct UsedState {
    cache: Vec<PackageItem>,
}

/// Orchestrates resolution, caching and install workflows for one configuration
pub struct PackageService {
    servers: Arc<PackageServerCollection>,
    automation: Option<Arc<dyn AutomationInterface>>,
    store: Option<Arc<dyn ConfigStore>>,
    cache_dir: PathBuf,
    config: Mutex<Configuration>,
    available: Mutex<AvailableState>,
    used: Mutex<UsedState>,
}

impl PackageService {
    pub fn new(servers: PackageServerCollection) -> Self {
        Self {
            servers: Arc::new(servers),
            automation: None,
            store: None,
            cache_dir: default_cache_dir(),
            config: Mutex::new(Configuration::default()),
            available: Mutex::new(AvailableState {
                term: None,
                cursor: None,
                cache: Vec::new(),
                exhausted: false,
            }),
            used: Mutex::new(UsedState { cache: Vec::new() }),
        }
    }

    pub fn with_automation(mut self, automation: Arc<dyn AutomationInterface>) -> Self {
        self.automation = Some(automation);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = Mutex::new(config);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn servers(&self) -> &PackageServerCollection {
        &self.servers
    }

    pub(crate) fn automation(&self) -> Option<&dyn AutomationInterface> {
        self.automation.as_deref()
    }

    /// Snapshot of the in-memory configuration
    pub async fn config(&self) -> Configuration {
        self.config.lock().await.clone()
    }

    pub async fn set_config(&self, config: Configuration) {
        *self.config.lock().await = config;
    }

    /// Load the configuration from the attached store
    pub async fn load_config(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Err(Error::ValidationError(
                "No configuration store attached".to_string(),
            ));
        };
        let loaded = store.load().await?.unwrap_or_default();
        *self.config.lock().await = loaded;
        Ok(())
    }

    /// Persist the configuration and flush host project files
    ///
    /// Never starts once cancellation has been observed.
    pub(crate) async fn persist(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(store) = &self.store {
            let snapshot = self.config.lock().await.clone();
            store.save(&snapshot).await?;
        }
        if let Some(automation) = &self.automation {
            automation.save_all().await?;
        }
        Ok(())
    }

    /// Drop every short-lived cache, including the member servers' own
    pub async fn invalidate_cache(&self) {
        {
            let mut available = self.available.lock().await;
            available.term = None;
            available.cursor = None;
            available.cache.clear();
            available.exhausted = false;
        }
        self.used.lock().await.cache.clear();
        self.servers.invalidate_cache();
    }

    /// Authenticate against one server; stale caches are dropped
    pub async fn login(&self, server_name: &str, username: &str, password: &str) -> Result<()> {
        self.servers.login(server_name, username, password).await?;
        self.invalidate_cache().await;
        Ok(())
    }

    /// Log out of one server; stale caches are dropped
    pub async fn logout(&self, server_name: &str) -> Result<()> {
        self.servers.logout(server_name).await?;
        self.invalidate_cache().await;
        Ok(())
    }

    /// Accumulate catalog entries for a search term
    ///
    /// Repeated calls with the same term continue the same lazy traversal;
    /// a new term discards the old cursor and its partial cache. Returns
    /// the accumulated cache, locally re-filtered by the term.
    pub async fn retrieve_available_packages(
        &self,
        search_term: Option<&str>,
        max_new: usize,
        per_page: usize,
        token: &CancellationToken,
    ) -> Result<Vec<CatalogEntry>> {
        let mut state = self.available.lock().await;
        let term = search_term.unwrap_or("").to_string();

        if state.term.as_deref() != Some(term.as_str()) {
            debug!("Search term changed to '{term}', restarting catalog traversal");
            tokio::time::sleep(SEARCH_DEBOUNCE).await;
            state.term = Some(term.clone());
            state.cache.clear();
            state.exhausted = false;
            let filter = (!term.is_empty()).then(|| term.clone());
            state.cursor = Some(self.servers.search(filter, None, per_page));
        }

        let mut added = 0;
        while added < max_new && !state.exhausted {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let next = match state.cursor.as_mut() {
                Some(cursor) => cursor.next().await,
                None => None,
            };
            match next {
                Some(entry) => {
                    if !state.cache.iter().any(|e| e.name == entry.name) {
                        state.cache.push(entry);
                        added += 1;
                    }
                }
                None => {
                    state.exhausted = true;
                    state.cursor = None;
                }
            }
        }

        Ok(state
            .cache
            .iter()
            .filter(|entry| entry.matches_filter(&term))
            .cloned()
            .collect())
    }

    /// Resolve every package declared in the configuration tree
    ///
    /// Modules are not supported: their presence is a hard precondition
    /// failure. Already-cached packages are not re-resolved unless the
    /// caller asks for metadata the cache entry lacks; stale entries are
    /// replaced per (project, plc, name) key.
    pub async fn retrieve_used_packages(
        &self,
        search_term: Option<&str>,
        include_metadata: bool,
        excluded_names: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        let mut state = self.used.lock().await;
        let config = self.config.lock().await.clone();

        if config.has_modules() {
            return Err(Error::ValidationError(
                "Configuration contains modules, which are not supported".to_string(),
            ));
        }

        for (project, plc, package) in config.packages() {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if excluded_names.iter().any(|name| name == &package.name) {
                continue;
            }

            let cached = state.cache.iter().position(|item| {
                item.project == project.name
                    && item.plc == plc.name
                    && item.name() == package.name
            });
            if let Some(idx) = cached {
                if !include_metadata || state.cache[idx].has_metadata() {
                    continue;
                }
            }

            let mut item = self
                .servers
                .fetch_package(
                    &project.name,
                    &plc.name,
                    &package.spec(),
                    include_metadata,
                    self.automation(),
                    None,
                )
                .await;
            item.options = package.options.clone();

            match &item.server {
                Some(server) => info!(
                    "Package '{}' satisfied by server '{}'",
                    package.name,
                    server.name()
                ),
                None => warn!("Package '{}' is not available on any server", package.name),
            }

            match cached {
                Some(idx) => state.cache[idx] = item,
                None => state.cache.push(item),
            }
        }

        let term = search_term.unwrap_or("").to_lowercase();
        Ok(state
            .cache
            .iter()
            .filter(|item| {
                term.is_empty()
                    || item.name().to_lowercase().contains(&term)
                    || item
                        .catalog
                        .as_ref()
                        .is_some_and(|c| c.matches_filter(&term))
            })
            .cloned()
            .collect())
    }
}

/// Default directory downloaded binaries are cached in
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("depot"))
        .unwrap_or_else(|| std::env::temp_dir().join("depot"))
}
