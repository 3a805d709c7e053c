//! Reference-counted resource leases.
//!
//! One async mutex guards the lease table. The first acquirer of a name
//! performs the physical load while holding it, so at most one load per
//! name is ever in flight. Loads of unrelated names queue behind the same
//! lock.
//!
//! Physical loads and unloads run on the blocking pool. Each physical load
//! stamps its entry with a fresh generation, which every lease carries.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::catalog::{ResourceCatalog, ResourceDescriptor};
use super::loader::{resolve_resource_path, CacheClearHook, LoadError, ResourceHandle, ResourceLoader};
use crate::engine::error::LoadFailureKind;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Resource not registered: {0}")]
    NotFound(String),

    #[error("Resource disabled: {0}")]
    Disabled(String),

    #[error("Failed to load {name}: {source}")]
    LoadFailure {
        name: String,
        kind: LoadFailureKind,
        #[source]
        source: LoadError,
    },
}

/// Resource manager configuration.
#[derive(Debug, Clone)]
pub struct ResourceManagerConfig {
    /// Directory relative descriptor paths are resolved against.
    pub resource_dir: PathBuf,
    /// Reported, not enforced.
    pub capacity_budget_mb: Option<u64>,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("models"),
            capacity_budget_mb: Some(8 * 1024),
        }
    }
}

/// Point-in-time view of the lease table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub loaded: Vec<String>,
    pub total_cost_mb: u64,
    pub refcounts: BTreeMap<String, usize>,
    pub capacity_budget_mb: Option<u64>,
    pub over_budget: bool,
}

impl ResourceStatus {
    pub fn is_loaded(&self, name: &str) -> bool {
        self.refcounts.contains_key(name)
    }
}

struct LeaseEntry {
    handle: ResourceHandle,
    refcount: usize,
    cost_mb: u64,
    loader: Arc<dyn ResourceLoader>,
    /// Bumped on every physical load; leases from an older load never
    /// touch a newer entry.
    generation: u64,
}

#[derive(Default)]
struct LeaseTable {
    entries: HashMap<String, LeaseEntry>,
    generation: u64,
}

enum Decrement {
    NotHeld,
    Held,
    Released(LeaseEntry),
}

/// Drop one reference. `None` matches whatever generation is loaded.
fn decrement(table: &mut LeaseTable, name: &str, generation: Option<u64>) -> Decrement {
    let Some(entry) = table.entries.get_mut(name) else {
        return Decrement::NotHeld;
    };
    if generation.is_some_and(|g| g != entry.generation) {
        debug!(resource = name, "stale lease ignored");
        return Decrement::NotHeld;
    }
    entry.refcount -= 1;
    debug!(resource = name, refcount = entry.refcount, "lease released");
    if entry.refcount > 0 {
        return Decrement::Held;
    }
    table
        .entries
        .remove(name)
        .map_or(Decrement::NotHeld, Decrement::Released)
}

fn report_unload(
    name: &str,
    cost_mb: u64,
    unloaded: Result<(), LoadError>,
    cleared: Option<Result<(), String>>,
) {
    match unloaded {
        Ok(()) => info!(resource = name, cost_mb, "resource unloaded"),
        Err(e) => warn!(resource = name, error = %e, "unload hook failed"),
    }
    if let Some(Err(e)) = cleared {
        debug!(resource = name, error = %e, "cache clear skipped");
    }
}

struct ManagerShared {
    table: Mutex<LeaseTable>,
    catalog: Arc<ResourceCatalog>,
    cache_hook: Option<Arc<dyn CacheClearHook>>,
    config: ResourceManagerConfig,
}

impl ManagerShared {
    /// Physical unload off the async loop. Never fails the caller.
    async fn unload(&self, name: &str, entry: LeaseEntry) {
        let LeaseEntry { handle, loader, cost_mb, .. } = entry;
        let hook = self.cache_hook.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let unloaded = loader.unload(handle);
            let cleared = hook.map(|h| h.clear());
            (unloaded, cleared)
        })
        .await;
        match outcome {
            Ok((unloaded, cleared)) => report_unload(name, cost_mb, unloaded, cleared),
            Err(e) => warn!(resource = name, error = %e, "unload task aborted"),
        }
    }

    /// Only valid outside an async context.
    fn unload_blocking(&self, name: &str, entry: LeaseEntry) {
        let LeaseEntry { handle, loader, cost_mb, .. } = entry;
        let unloaded = loader.unload(handle);
        let cleared = self.cache_hook.as_ref().map(|h| h.clear());
        report_unload(name, cost_mb, unloaded, cleared);
    }

    async fn release_one(&self, name: &str, generation: Option<u64>) -> bool {
        let mut table = self.table.lock().await;
        match decrement(&mut table, name, generation) {
            Decrement::NotHeld => false,
            Decrement::Held => true,
            Decrement::Released(entry) => {
                self.unload(name, entry).await;
                true
            }
        }
    }

    /// The release runs to completion even if nobody awaits the handle.
    fn spawn_release(self: &Arc<Self>, name: String, generation: Option<u64>) -> JoinHandle<bool> {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.release_one(&name, generation).await })
    }

    /// Only valid outside an async context.
    fn release_one_blocking(&self, name: &str, generation: Option<u64>) -> bool {
        let mut table = self.table.blocking_lock();
        match decrement(&mut table, name, generation) {
            Decrement::NotHeld => false,
            Decrement::Held => true,
            Decrement::Released(entry) => {
                self.unload_blocking(name, entry);
                true
            }
        }
    }

    /// Add one reference under the table lock, loading on the first.
    async fn reference(
        &self,
        table: &mut LeaseTable,
        descriptor: &ResourceDescriptor,
    ) -> Result<(ResourceHandle, u64), ResourceError> {
        let name = descriptor.name.as_str();
        if let Some(entry) = table.entries.get_mut(name) {
            entry.refcount += 1;
            debug!(resource = name, refcount = entry.refcount, "lease reused");
            return Ok((entry.handle.clone(), entry.generation));
        }

        let path = resolve_resource_path(&self.config.resource_dir, &descriptor.path);
        let loader = descriptor.loader.clone();
        let started = Instant::now();
        let loaded = {
            let loader = loader.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || loader.load(&path))
                .await
                .unwrap_or_else(|e| Err(LoadError::Failed(format!("loader task aborted: {e}"))))
        };

        match loaded {
            Ok(handle) => {
                table.generation += 1;
                let generation = table.generation;
                table.entries.insert(
                    name.to_string(),
                    LeaseEntry {
                        handle: handle.clone(),
                        refcount: 1,
                        cost_mb: descriptor.cost_mb,
                        loader,
                        generation,
                    },
                );
                self.catalog.mark_available(name, true);

                let loaded_cost_mb: u64 = table.entries.values().map(|e| e.cost_mb).sum();
                info!(
                    resource = name,
                    path = %path.display(),
                    cost_mb = descriptor.cost_mb,
                    loaded_cost_mb,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "resource loaded"
                );
                if let Some(budget) = self.config.capacity_budget_mb {
                    if loaded_cost_mb > budget {
                        warn!(loaded_cost_mb, budget_mb = budget, "capacity budget exceeded");
                    }
                }
                Ok((handle, generation))
            }
            Err(source) => {
                let kind = LoadFailureKind::of(&source);
                match kind {
                    LoadFailureKind::MissingOptional => {
                        self.catalog.mark_available(name, false);
                        warn!(resource = name, error = %source, "optional resource unavailable");
                    }
                    LoadFailureKind::Unexpected => {
                        error!(resource = name, error = %source, "resource load failed");
                    }
                }
                Err(ResourceError::LoadFailure {
                    name: name.to_string(),
                    kind,
                    source,
                })
            }
        }
    }
}

/// One caller's hold on a loaded resource.
///
/// Released exactly once: explicitly through [`Lease::release`], or on drop.
/// A dropped lease hands its release to the current tokio runtime, or runs
/// it inline when there is none. A lease that outlived `release_all` is
/// inert.
pub struct Lease {
    name: String,
    handle: ResourceHandle,
    generation: u64,
    shared: Option<Arc<ManagerShared>>,
}

impl Lease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Release and wait for the table update (and unload, if last).
    ///
    /// The release is committed before the first await, so cancelling
    /// this future does not leak the reference.
    pub async fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            let task = shared.spawn_release(std::mem::take(&mut self.name), Some(self.generation));
            if let Err(e) = task.await {
                warn!(error = %e, "lease release task failed");
            }
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("released", &self.shared.is_none())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(_) => {
                shared.spawn_release(name, Some(self.generation));
            }
            Err(_) => {
                shared.release_one_blocking(&name, Some(self.generation));
            }
        }
    }
}

/// Owns the lease table. Construct once and share behind an `Arc`.
///
/// Every table mutation runs in its own spawned task, so a caller that is
/// cancelled mid-call never leaves a half-applied acquire or release.
pub struct ResourceManager {
    shared: Arc<ManagerShared>,
}

impl ResourceManager {
    pub fn new(catalog: Arc<ResourceCatalog>, config: ResourceManagerConfig) -> Self {
        Self::build(catalog, config, None)
    }

    pub fn with_cache_hook(
        catalog: Arc<ResourceCatalog>,
        config: ResourceManagerConfig,
        hook: Arc<dyn CacheClearHook>,
    ) -> Self {
        Self::build(catalog, config, Some(hook))
    }

    fn build(
        catalog: Arc<ResourceCatalog>,
        config: ResourceManagerConfig,
        cache_hook: Option<Arc<dyn CacheClearHook>>,
    ) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                table: Mutex::new(LeaseTable::default()),
                catalog,
                cache_hook,
                config,
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<ResourceCatalog> {
        &self.shared.catalog
    }

    /// Acquire a scoped lease, loading the resource on first reference.
    pub async fn acquire(&self, name: &str) -> Result<Lease, ResourceError> {
        let (handle, generation) = self.add_reference(name).await?;
        Ok(Lease {
            name: name.to_string(),
            handle,
            generation,
            shared: Some(self.shared.clone()),
        })
    }

    /// Add one unscoped reference. Pair with [`ResourceManager::release`].
    pub async fn preload(&self, name: &str) -> Result<(), ResourceError> {
        self.add_reference(name).await.map(|_| ())
    }

    /// Drop one unscoped reference. No-op (returns false) if not loaded.
    pub async fn release(&self, name: &str) -> bool {
        self.shared
            .spawn_release(name.to_string(), None)
            .await
            .unwrap_or(false)
    }

    /// Unload everything regardless of refcount. Returns the number unloaded.
    /// Leases still outstanding become no-ops on release.
    pub async fn release_all(&self) -> usize {
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let mut table = shared.table.lock().await;
            let drained: Vec<(String, LeaseEntry)> = table.entries.drain().collect();
            let count = drained.len();
            for (name, entry) in drained {
                shared.unload(&name, entry).await;
            }
            if count > 0 {
                info!(count, "all resources released");
            }
            count
        });
        task.await.unwrap_or(0)
    }

    pub async fn status(&self) -> ResourceStatus {
        let table = self.shared.table.lock().await;
        let mut loaded: Vec<String> = table.entries.keys().cloned().collect();
        loaded.sort();
        let refcounts = table
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.refcount))
            .collect();
        drop(table);

        let total_cost_mb = self.shared.catalog.total_cost(&loaded);
        let capacity_budget_mb = self.shared.config.capacity_budget_mb;
        ResourceStatus {
            loaded,
            total_cost_mb,
            refcounts,
            capacity_budget_mb,
            over_budget: capacity_budget_mb.is_some_and(|b| total_cost_mb > b),
        }
    }

    pub async fn refcount(&self, name: &str) -> usize {
        self.shared
            .table
            .lock()
            .await
            .entries
            .get(name)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.shared.table.lock().await.entries.contains_key(name)
    }

    async fn add_reference(&self, name: &str) -> Result<(ResourceHandle, u64), ResourceError> {
        let descriptor = self
            .shared
            .catalog
            .lookup(name)
            .ok_or_else(|| ResourceError::NotFound(name.to_string()))?;
        if !descriptor.enabled {
            return Err(ResourceError::Disabled(name.to_string()));
        }

        // Lock, load and insert in a task of their own. If the caller is
        // gone by the time the reference exists, the task hands it back.
        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut table = shared.table.lock().await;
            let outcome = shared.reference(&mut table, &descriptor).await;
            if let Err(Ok((_, generation))) = tx.send(outcome) {
                let name = descriptor.name.as_str();
                debug!(resource = name, "acquirer went away, reference returned");
                if let Decrement::Released(entry) = decrement(&mut table, name, Some(generation)) {
                    shared.unload(name, entry).await;
                }
            }
        });

        rx.await.unwrap_or_else(|_| {
            Err(ResourceError::LoadFailure {
                name: name.to_string(),
                kind: LoadFailureKind::Unexpected,
                source: LoadError::Failed("acquire task aborted".into()),
            })
        })
    }
}
