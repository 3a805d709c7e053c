//! Loader capability and opaque resource handles.
//!
//! A loader turns a path into a handle. The core never looks inside a
//! handle; the analyzer bound to the same stage downcasts it back to the
//! concrete type its loader produced.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Optional dependency missing: {0}")]
    MissingDependency(String),

    #[error("Resource file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid resource format: {0}")]
    InvalidFormat(String),

    #[error("Load failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// True when the failure looks like an optional capability that simply
    /// is not installed on this host, rather than a broken one.
    pub fn is_expected_missing(&self) -> bool {
        matches!(self, Self::MissingDependency(_) | Self::NotFound(_))
    }
}

/// Shared, type-erased handle to a loaded resource.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<dyn Any + Send + Sync>,
}

impl ResourceHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { inner: Arc::new(value) }
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self { inner: value }
    }

    /// Recover the concrete resource. Returns `None` on a type mismatch.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Number of live clones of this handle (table entry plus leases).
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle").finish_non_exhaustive()
    }
}

/// Turns a resource path into a live handle.
///
/// Both methods are blocking; the manager calls them off the async loop.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ResourceHandle, LoadError>;

    /// Release hook invoked when the last reference goes away.
    fn unload(&self, handle: ResourceHandle) -> Result<(), LoadError> {
        drop(handle);
        Ok(())
    }
}

/// Best-effort hook run after every physical unload (e.g. an accelerator
/// allocator cache flush). Errors are logged and ignored.
pub trait CacheClearHook: Send + Sync {
    fn clear(&self) -> Result<(), String>;
}

/// Resolve a descriptor path against the resource directory.
/// Absolute paths are used as-is.
pub fn resolve_resource_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
