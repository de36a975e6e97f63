// src/config/store.rs

//! Configuration persistence
//!
//! The store owns durability only; the in-memory tree is mutated by the
//! package service and written back atomically at the end of a workflow,
//! never partially flushed mid-workflow.

use crate::config::Configuration;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable storage for the configuration document
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the configuration; `None` when no document exists yet
    async fn load(&self) -> Result<Option<Configuration>>;

    /// Replace the stored configuration
    async fn save(&self, config: &Configuration) -> Result<()>;
}

/// TOML file store with atomic replace-on-save
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<Option<Configuration>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let config = toml::from_str(&text).map_err(|e| {
            Error::ParseError(format!("Invalid configuration {}: {e}", self.path.display()))
        })?;
        Ok(Some(config))
    }

    async fn save(&self, config: &Configuration) -> Result<()> {
        let text = toml::to_string_pretty(config)
            .map_err(|e| Error::ParseError(format!("Failed to serialize configuration: {e}")))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // Write to a temporary file first, then rename into place
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, text).await.map_err(|e| {
            Error::IoError(format!("Failed to write {}: {e}", temp_path.display()))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                self.path.display()
            ))
        })?;

        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}
