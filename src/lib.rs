// src/lib.rs

//! Depot package client
//!
//! A client engine for binary software-component libraries: resolves
//! named, versioned package requests against one or more remote catalogs,
//! computes transitive dependency closures, downloads and caches binaries,
//! and orchestrates installation into a consuming project together with
//! persisted configuration.
//!
//! # Architecture
//!
//! - Capability-first: remote catalogs and the host installer are traits
//!   ([`PackageServer`], [`AutomationInterface`]); the engine never
//!   assumes an implementation
//! - Fallback-ordered: servers are tried in priority order, and "not
//!   found" is an empty result, never an error
//! - Instance-owned caches: every short-lived cache belongs to a service
//!   or collection instance and is reproducible by re-resolution
//! - Batch-tolerant: bulk operations attempt every item and raise one
//!   aggregate error afterwards

pub mod automation;
pub mod config;
mod error;
pub mod model;
pub mod retry;
pub mod server;
pub mod service;

pub use automation::{AutomationInterface, HeadlessAutomation};
pub use config::{
    ConfigModule, ConfigPackage, ConfigPlc, ConfigProject, ConfigStore, Configuration,
    FileConfigStore, PlcKind,
};
pub use error::{Error, ErrorKind, Result};
pub use model::{
    compare_versions, CatalogEntry, ItemKey, PackageItem, PackageOptions, PackageSpec,
    PackageVersion,
};
pub use retry::RetryPolicy;
pub use server::{
    ChecksumMode, HttpPackageServer, InMemoryPackageServer, PackageServer,
    PackageServerCollection, SharedServer,
};
pub use service::{
    default_cache_dir, AddOptions, AffectedCache, PackageService, RestoreOptions,
    SetVersionOptions, UpdateFilter, UpdateOptions,
};
