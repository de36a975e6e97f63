// src/service/closure.rs

//! Affected-package closure
//!
//! Computes the de-duplicated set of packages an operation touches: the
//! requested packages plus, when asked, their transitive dependencies.
//! Implemented as an explicit worklist over a caller-owned visited cache,
//! so termination on cyclic and diamond dependency graphs holds by
//! construction: each (project, plc, name) triple is processed at most
//! once, and the first-seen item's options win on duplicates.

use crate::error::{Error, Result};
use crate::model::{ItemKey, PackageItem};
use crate::service::PackageService;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Visited set shared across a closure computation
///
/// Owned by the caller so one cache can span an entire multi-PLC
/// operation when global de-duplication is wanted.
pub type AffectedCache = HashMap<ItemKey, PackageItem>;

impl PackageService {
    /// Expand `items` into their affected closure
    ///
    /// Items lacking full metadata are resolved first; an item no server
    /// resolves is discarded with a warning, never an error. With
    /// `include_dependencies`, synthetic items are constructed for each
    /// dependency, inheriting the parent's consumer context and install
    /// options, and merged through the same cache.
    ///
    /// Returns the items newly added to the cache, in first-seen order.
    pub async fn affected_packages(
        &self,
        items: &[PackageItem],
        include_dependencies: bool,
        cache: &mut AffectedCache,
        token: &CancellationToken,
    ) -> Result<Vec<PackageItem>> {
        let mut affected = Vec::new();
        let mut queue: VecDeque<PackageItem> = items.iter().cloned().collect();

        while let Some(item) = queue.pop_front() {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let key = item.key();
            if cache.contains_key(&key) {
                // First writer wins, however many paths reach this package
                continue;
            }

            let item = if item.has_metadata() {
                item
            } else {
                let mut fetched = self
                    .servers
                    .fetch_package(
                        &item.project,
                        &item.plc,
                        &item.config,
                        true,
                        self.automation(),
                        item.server.clone(),
                    )
                    .await;
                if !fetched.is_resolved() {
                    warn!("Discarding '{}': no server resolves it", item.name());
                    continue;
                }
                fetched.options = item.options.clone();
                fetched
            };

            cache.insert(key, item.clone());

            if include_dependencies {
                for dep in item.dependencies.iter().flatten() {
                    let mut synthetic = dep.clone();
                    synthetic.project = item.project.clone();
                    synthetic.plc = item.plc.clone();
                    synthetic.options = item.options.clone();
                    queue.push_back(synthetic);
                }
            }

            affected.push(item);
        }

        Ok(affected)
    }
}
