//! Tests for ResourceManager - reference-counted leases over the catalog.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{descriptor, CountingLoader, FailMode, FailingCacheHook, FakeResource};
use enrich_core::engine::{EnrichError, LoadFailureKind};
use enrich_core::models::{
    ResourceCatalog, ResourceError, ResourceManager, ResourceManagerConfig,
};

fn manager_with(loader: Arc<CountingLoader>) -> ResourceManager {
    let catalog = ResourceCatalog::new();
    catalog.register(descriptor("face_detector", 300, loader.clone()));
    catalog.register(descriptor("plate_reader", 200, loader));
    ResourceManager::new(Arc::new(catalog), ResourceManagerConfig::default())
}

/// Let spawned drop-releases run.
async fn settle(manager: &ResourceManager, name: &str) {
    for _ in 0..50 {
        if !manager.is_loaded(name).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Acquire / Release
// ============================================================================

#[tokio::test]
async fn test_first_acquire_loads_and_release_unloads() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let lease = manager.acquire("face_detector").await.unwrap();
    assert_eq!(loader.loads(), 1);
    assert_eq!(manager.refcount("face_detector").await, 1);
    assert!(lease.handle().downcast::<FakeResource>().is_some());

    lease.release().await;
    assert_eq!(loader.unloads(), 1);
    assert!(!manager.is_loaded("face_detector").await);
}

#[tokio::test]
async fn test_nested_acquire_shares_one_load() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let outer = manager.acquire("face_detector").await.unwrap();
    let inner = manager.acquire("face_detector").await.unwrap();
    assert_eq!(loader.loads(), 1);
    assert_eq!(manager.refcount("face_detector").await, 2);

    inner.release().await;
    assert!(manager.is_loaded("face_detector").await);
    assert_eq!(loader.unloads(), 0);

    outer.release().await;
    assert_eq!(loader.unloads(), 1);
    assert_eq!(manager.refcount("face_detector").await, 0);
}

#[tokio::test]
async fn test_resource_path_resolved_against_dir() {
    let loader = CountingLoader::new();
    let catalog = ResourceCatalog::new();
    catalog.register(descriptor("face_detector", 10, loader.clone()));
    let config = ResourceManagerConfig {
        resource_dir: PathBuf::from("/srv/weights"),
        capacity_budget_mb: None,
    };
    let manager = ResourceManager::new(Arc::new(catalog), config);

    manager.acquire("face_detector").await.unwrap().release().await;
    assert_eq!(
        loader.paths.lock().as_slice(),
        &[PathBuf::from("/srv/weights/face_detector.bin")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_loads_once() {
    let loader = CountingLoader::with_delay(Duration::from_millis(30));
    let manager = Arc::new(manager_with(loader.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let lease = manager.acquire("face_detector").await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                lease.release().await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(loader.loads(), 1);
    assert_eq!(loader.unloads(), 1);
    assert!(!manager.is_loaded("face_detector").await);
}

#[tokio::test]
async fn test_dropped_lease_is_released() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    {
        let _lease = manager.acquire("plate_reader").await.unwrap();
        assert_eq!(manager.refcount("plate_reader").await, 1);
    }
    settle(&manager, "plate_reader").await;

    assert!(!manager.is_loaded("plate_reader").await);
    assert_eq!(loader.unloads(), 1);
}

#[tokio::test]
async fn test_cancelled_release_still_releases() {
    let fast = CountingLoader::new();
    let slow = CountingLoader::with_delay(Duration::from_millis(100));
    let catalog = ResourceCatalog::new();
    catalog.register(descriptor("face_detector", 300, fast.clone()));
    catalog.register(descriptor("plate_reader", 200, slow));
    let manager = Arc::new(ResourceManager::new(
        Arc::new(catalog),
        ResourceManagerConfig::default(),
    ));

    let lease = manager.acquire("face_detector").await.unwrap();
    let loading = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire("plate_reader").await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The slow load holds the table, so the release cannot finish in time.
    let waited = tokio::time::timeout(Duration::from_millis(10), lease.release()).await;
    assert!(waited.is_err());

    loading.await.unwrap().release().await;
    settle(&manager, "face_detector").await;
    assert_eq!(manager.refcount("face_detector").await, 0);
    assert_eq!(fast.unloads(), 1);
}

#[tokio::test]
async fn test_cancelled_first_acquire_returns_its_reference() {
    let loader = CountingLoader::with_delay(Duration::from_millis(100));
    let manager = manager_with(loader.clone());

    let waited =
        tokio::time::timeout(Duration::from_millis(10), manager.acquire("face_detector")).await;
    assert!(waited.is_err());

    let lease = manager.acquire("face_detector").await.unwrap();
    assert_eq!(manager.refcount("face_detector").await, 1);

    lease.release().await;
    assert!(!manager.is_loaded("face_detector").await);
    assert_eq!(loader.loads(), loader.unloads());
}

#[test]
fn test_lease_dropped_outside_runtime_is_released() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let lease = tokio_test::block_on(manager.acquire("plate_reader")).unwrap();
    drop(lease);

    assert_eq!(loader.unloads(), 1);
    assert!(!tokio_test::block_on(manager.is_loaded("plate_reader")));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_name_is_not_found() {
    let manager = manager_with(CountingLoader::new());

    let err = manager.acquire("ghost").await.unwrap_err();
    assert!(matches!(err, ResourceError::NotFound(ref n) if n == "ghost"));
    assert!(manager.status().await.loaded.is_empty());
}

#[tokio::test]
async fn test_disabled_resource_is_rejected() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());
    manager.catalog().set_enabled("face_detector", false);

    let err = manager.acquire("face_detector").await.unwrap_err();
    assert!(matches!(err, ResourceError::Disabled(_)));
    assert_eq!(loader.loads(), 0);
}

#[tokio::test]
async fn test_missing_dependency_rolls_back_and_marks_unavailable() {
    let loader = CountingLoader::failing(FailMode::MissingDependency);
    let manager = manager_with(loader.clone());

    let err = manager.acquire("face_detector").await.unwrap_err();
    match &err {
        ResourceError::LoadFailure { name, kind, .. } => {
            assert_eq!(name, "face_detector");
            assert_eq!(*kind, LoadFailureKind::MissingOptional);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(manager.refcount("face_detector").await, 0);
    assert!(!manager.catalog().lookup("face_detector").unwrap().available);

    let enrich: EnrichError = err.into();
    assert!(enrich.is_warning());
}

#[tokio::test]
async fn test_load_recovers_after_failure() {
    let loader = CountingLoader::failing(FailMode::Broken);
    let manager = manager_with(loader.clone());

    let err = manager.acquire("plate_reader").await.unwrap_err();
    assert!(matches!(
        err,
        ResourceError::LoadFailure { kind: LoadFailureKind::Unexpected, .. }
    ));

    loader.set_fail(FailMode::Never);
    let lease = manager.acquire("plate_reader").await.unwrap();
    assert_eq!(manager.refcount("plate_reader").await, 1);
    assert!(manager.catalog().lookup("plate_reader").unwrap().available);
    lease.release().await;
}

#[tokio::test]
async fn test_cache_hook_failure_is_swallowed() {
    let loader = CountingLoader::new();
    let catalog = ResourceCatalog::new();
    catalog.register(descriptor("face_detector", 10, loader.clone()));
    let hook = Arc::new(FailingCacheHook::default());
    let manager = ResourceManager::with_cache_hook(
        Arc::new(catalog),
        ResourceManagerConfig::default(),
        hook.clone(),
    );

    manager.acquire("face_detector").await.unwrap().release().await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.unloads(), 1);
}

// ============================================================================
// Preload / Release / Status
// ============================================================================

#[tokio::test]
async fn test_preload_holds_until_release() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    manager.preload("face_detector").await.unwrap();
    let lease = manager.acquire("face_detector").await.unwrap();
    lease.release().await;
    assert!(manager.is_loaded("face_detector").await);

    assert!(manager.release("face_detector").await);
    assert!(!manager.is_loaded("face_detector").await);
    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn test_release_of_unloaded_is_noop() {
    let manager = manager_with(CountingLoader::new());
    assert!(!manager.release("face_detector").await);
    assert!(!manager.release("ghost").await);
}

#[tokio::test]
async fn test_release_all_unloads_everything() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let lease = manager.acquire("face_detector").await.unwrap();
    manager.preload("plate_reader").await.unwrap();
    manager.preload("plate_reader").await.unwrap();

    assert_eq!(manager.release_all().await, 2);
    assert_eq!(loader.unloads(), 2);
    assert!(manager.status().await.loaded.is_empty());

    // Outstanding lease no longer holds anything.
    lease.release().await;
    assert_eq!(loader.unloads(), 2);
}

#[tokio::test]
async fn test_status_reports_cost_and_budget() {
    let loader = CountingLoader::new();
    let catalog = ResourceCatalog::new();
    catalog.register(descriptor("face_detector", 300, loader.clone()));
    catalog.register(descriptor("plate_reader", 200, loader));
    let config = ResourceManagerConfig {
        resource_dir: PathBuf::from("models"),
        capacity_budget_mb: Some(400),
    };
    let manager = ResourceManager::new(Arc::new(catalog), config);

    manager.preload("face_detector").await.unwrap();
    let status = manager.status().await;
    assert_eq!(status.total_cost_mb, 300);
    assert!(!status.over_budget);

    manager.preload("plate_reader").await.unwrap();
    manager.preload("plate_reader").await.unwrap();
    let status = manager.status().await;
    assert_eq!(status.loaded, vec!["face_detector", "plate_reader"]);
    assert_eq!(status.total_cost_mb, 500);
    assert_eq!(status.refcounts["plate_reader"], 2);
    assert!(status.over_budget);
    assert!(status.is_loaded("face_detector"));
}

#[tokio::test]
async fn test_stale_lease_leaves_reloaded_resource_alone() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let stale = manager.acquire("face_detector").await.unwrap();
    assert_eq!(manager.release_all().await, 1);
    let live = manager.acquire("face_detector").await.unwrap();

    stale.release().await;
    assert!(manager.is_loaded("face_detector").await);
    assert_eq!(manager.refcount("face_detector").await, 1);
    assert_eq!(loader.unloads(), 1);

    live.release().await;
    assert_eq!(loader.unloads(), 2);
    assert!(!manager.is_loaded("face_detector").await);
}

#[tokio::test]
async fn test_dropped_stale_lease_leaves_reloaded_resource_alone() {
    let loader = CountingLoader::new();
    let manager = manager_with(loader.clone());

    let stale = manager.acquire("plate_reader").await.unwrap();
    manager.release_all().await;
    let live = manager.acquire("plate_reader").await.unwrap();

    drop(stale);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.refcount("plate_reader").await, 1);

    live.release().await;
    assert_eq!(loader.loads(), 2);
    assert_eq!(loader.unloads(), 2);
}
