//! Resource management for the enrichment core.
//!
//! Holds the static catalog of loadable resources, the loader capability,
//! and the reference-counted lease manager.

mod catalog;
mod loader;
mod manager;

pub use catalog::{ResourceCatalog, ResourceCategory, ResourceDescriptor};
pub use loader::{resolve_resource_path, CacheClearHook, LoadError, ResourceHandle, ResourceLoader};
pub use manager::{Lease, ResourceError, ResourceManager, ResourceManagerConfig, ResourceStatus};
