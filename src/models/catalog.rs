//! Static catalog of loadable resources.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::loader::ResourceLoader;

/// Broad kind of resource, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Detector,
    TextRecognition,
    Classifier,
    Segmenter,
    Embedder,
    VisionLanguage,
}

/// One loadable capability.
///
/// Everything but `enabled` and `available` is fixed at registration.
#[derive(Clone)]
pub struct ResourceDescriptor {
    pub name: String,
    pub path: PathBuf,
    /// Capacity cost in megabytes.
    pub cost_mb: u64,
    pub enabled: bool,
    pub category: ResourceCategory,
    pub loader: Arc<dyn ResourceLoader>,
    /// Set once a load succeeds, cleared when the capability turns out to
    /// be missing on this host.
    pub available: bool,
}

impl ResourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        cost_mb: u64,
        category: ResourceCategory,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            cost_mb,
            enabled: true,
            category,
            loader,
            available: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("cost_mb", &self.cost_mb)
            .field("enabled", &self.enabled)
            .field("category", &self.category)
            .field("available", &self.available)
            .finish_non_exhaustive()
    }
}

/// Thread-safe name → descriptor registry.
pub struct ResourceCatalog {
    descriptors: RwLock<HashMap<String, ResourceDescriptor>>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a descriptor. Re-registering a name replaces it.
    pub fn register(&self, descriptor: ResourceDescriptor) {
        self.descriptors
            .write()
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn lookup(&self, name: &str) -> Option<ResourceDescriptor> {
        self.descriptors.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.read().contains_key(name)
    }

    /// Enabled descriptors, sorted by name.
    pub fn list_enabled(&self) -> Vec<ResourceDescriptor> {
        let mut enabled: Vec<_> = self
            .descriptors
            .read()
            .values()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.name.cmp(&b.name));
        enabled
    }

    /// Sum of costs for the given names. Unknown names are ignored.
    pub fn total_cost<S: AsRef<str>>(&self, names: &[S]) -> u64 {
        let descriptors = self.descriptors.read();
        names
            .iter()
            .filter_map(|n| descriptors.get(n.as_ref()))
            .map(|d| d.cost_mb)
            .sum()
    }

    /// Returns false if the name is not registered.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.descriptors.write().get_mut(name) {
            Some(d) => {
                d.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn mark_available(&self, name: &str, available: bool) {
        if let Some(d) = self.descriptors.write().get_mut(name) {
            d.available = available;
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}
