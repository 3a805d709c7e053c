//! Enrichment Core
//!
//! Runs batches of object detections from a camera frame through a fixed
//! sequence of analysis stages and merges their findings into one result.
//!
//! # Components
//!
//! - **Catalog**: static registry of loadable resources and their costs
//! - **Resource manager**: reference-counted leases, one physical load per
//!   resource, unload when the last holder lets go
//! - **Orchestrator**: class routing, per-stage leasing, failure isolation
//! - **Aggregate**: per-detection findings, existence flags, risk modifiers
//!
//! Analysis itself lives behind the `Analyzer` and `RemoteAnalyzer`
//! capabilities; the core never interprets a loaded resource.

pub mod config;
pub mod engine;
pub mod models;
pub mod pipeline;
pub mod telemetry;

use std::sync::Arc;

use tracing::info;

use config::EnvConfig;
use engine::{BatchContext, Detection, EnrichError, FrameImage};
use models::{ResourceCatalog, ResourceManager, ResourceStatus};
use pipeline::{AggregateResult, AnalyzerTable, Orchestrator, WarmUpReport};

/// The enrichment runtime instance.
pub struct EnrichmentRuntime {
    pub config: EnvConfig,
    pub catalog: Arc<ResourceCatalog>,
    pub manager: Arc<ResourceManager>,
    pub orchestrator: Orchestrator,
}

impl EnrichmentRuntime {
    /// Wire catalog, manager and orchestrator from one configuration.
    pub fn new(config: EnvConfig, catalog: Arc<ResourceCatalog>, analyzers: AnalyzerTable) -> Self {
        let manager = Arc::new(ResourceManager::new(catalog.clone(), config.manager_config()));
        let orchestrator =
            Orchestrator::new(manager.clone(), analyzers, config.orchestrator_config());
        Self {
            config,
            catalog,
            manager,
            orchestrator,
        }
    }

    pub async fn process(
        &self,
        detections: &[Detection],
        images: &[FrameImage],
        context: &BatchContext,
    ) -> Result<AggregateResult, EnrichError> {
        self.orchestrator.process(detections, images, context).await
    }

    pub async fn warm_up(&self) -> WarmUpReport {
        self.orchestrator.warm_up().await
    }

    pub async fn status(&self) -> ResourceStatus {
        self.manager.status().await
    }

    /// Unload every resource. Outstanding leases become no-ops.
    pub async fn shutdown(&self) -> usize {
        let unloaded = self.manager.release_all().await;
        info!(unloaded, "enrichment runtime shut down");
        unloaded
    }
}
