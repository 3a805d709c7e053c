//! Enrichment orchestrator.
//!
//! Drives every batch through `Stage::ORDER`. Each stage picks its
//! detections, leases what it needs, runs its analyzer, and merges the
//! results. A failing stage or detection lands in the aggregate's error
//! list and the batch carries on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, warn, Instrument, Level};
use uuid::Uuid;

use super::aggregate::AggregateResult;
use super::stage::{Stage, StageScope};
use crate::engine::analyzer::{Analyzer, AnalyzerError, RemoteAnalyzer};
use crate::engine::error::EnrichError;
use crate::engine::input::{is_person, AnalyzerInput, BatchContext, Detection, FrameImage};
use crate::engine::output::StageOutput;
use crate::models::{Lease, ResourceHandle, ResourceManager};
use crate::telemetry::{BatchSpan, SpanExt, StageSpan};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Detections below this confidence skip every stage.
    pub min_confidence: f32,
    /// Serve remote-capable stages from their remote analyzer when bound.
    pub use_remote: bool,
    pub disabled_stages: BTreeSet<Stage>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            use_remote: false,
            disabled_stages: BTreeSet::new(),
        }
    }
}

/// A local analyzer plus the resources it leases, in handle order.
#[derive(Clone)]
pub struct StageBinding {
    pub resources: Vec<String>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl StageBinding {
    /// Bind with the stage's default resources.
    pub fn new(stage: Stage, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            resources: stage.default_resources().iter().map(|s| s.to_string()).collect(),
            analyzer,
        }
    }

    pub fn with_resources(resources: &[&str], analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            resources: resources.iter().map(|s| s.to_string()).collect(),
            analyzer,
        }
    }
}

/// Stage → capability table.
#[derive(Default, Clone)]
pub struct AnalyzerTable {
    local: HashMap<Stage, StageBinding>,
    remote: HashMap<Stage, Arc<dyn RemoteAnalyzer>>,
}

impl AnalyzerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(self, stage: Stage, analyzer: Arc<dyn Analyzer>) -> Self {
        self.bind_with(stage, StageBinding::new(stage, analyzer))
    }

    pub fn bind_with(mut self, stage: Stage, binding: StageBinding) -> Self {
        self.local.insert(stage, binding);
        self
    }

    /// Ignored for stages without a remote variant.
    pub fn bind_remote(mut self, stage: Stage, analyzer: Arc<dyn RemoteAnalyzer>) -> Self {
        if stage.supports_remote() {
            self.remote.insert(stage, analyzer);
        } else {
            warn!(stage = stage.name(), "stage has no remote variant, binding ignored");
        }
        self
    }

    pub fn local(&self, stage: Stage) -> Option<&StageBinding> {
        self.local.get(&stage)
    }

    pub fn remote(&self, stage: Stage) -> Option<&Arc<dyn RemoteAnalyzer>> {
        self.remote.get(&stage)
    }
}

/// Outcome of [`Orchestrator::warm_up`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmUpReport {
    pub loaded: Vec<String>,
    /// (resource, error message)
    pub failed: Vec<(String, String)>,
}

struct Subject<'a> {
    key: String,
    detection: &'a Detection,
}

struct Batch<'a> {
    subjects: Vec<Subject<'a>>,
    images: &'a [FrameImage],
    camera_id: Option<&'a str>,
    person_count: usize,
}

impl Batch<'_> {
    fn primary_image(&self) -> &FrameImage {
        // Checked non-empty before the batch is built.
        &self.images[0]
    }
}

enum Work<'b, 'a> {
    Detections(Vec<&'b Subject<'a>>),
    Frame,
}

impl Work<'_, '_> {
    fn len(&self) -> usize {
        match self {
            Work::Detections(targets) => targets.len(),
            Work::Frame => 1,
        }
    }
}

enum Backing<'o> {
    Local(&'o StageBinding),
    Remote(&'o Arc<dyn RemoteAnalyzer>),
}

impl Backing<'_> {
    fn label(&self) -> &'static str {
        match self {
            Backing::Local(_) => "local",
            Backing::Remote(_) => "remote",
        }
    }
}

type Outcome = (Option<String>, Result<StageOutput, EnrichError>);

/// Runs detection batches through the stage pipeline.
pub struct Orchestrator {
    manager: Arc<ResourceManager>,
    analyzers: AnalyzerTable,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<ResourceManager>,
        analyzers: AnalyzerTable,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            manager,
            analyzers,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Enrich one batch.
    ///
    /// Fails only on structurally invalid input. Resource and analyzer
    /// failures are recorded in the returned aggregate.
    pub async fn process(
        &self,
        detections: &[Detection],
        images: &[FrameImage],
        context: &BatchContext,
    ) -> Result<AggregateResult, EnrichError> {
        let batch_id = Uuid::new_v4();
        if detections.is_empty() {
            return Ok(AggregateResult::new(batch_id));
        }

        let span = BatchSpan::new(
            &batch_id.to_string(),
            context.camera_id.as_deref(),
            detections.len(),
        );
        let result = self
            .process_batch(batch_id, detections, images, context)
            .instrument(span.clone())
            .await;

        span.record_result(&result);
        if let Ok(aggregate) = &result {
            span.record("errors", aggregate.errors.len());
            span.record("latency_ms", aggregate.processing_ms);
        }
        result
    }

    async fn process_batch(
        &self,
        batch_id: Uuid,
        detections: &[Detection],
        images: &[FrameImage],
        context: &BatchContext,
    ) -> Result<AggregateResult, EnrichError> {
        let started = Instant::now();
        context.validate()?;
        for detection in detections {
            detection.validate()?;
        }
        if images.is_empty() {
            return Err(EnrichError::InvalidInput("no frame image supplied".into()));
        }

        let subjects: Vec<Subject<'_>> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| d.confidence >= self.config.min_confidence)
            .map(|(index, detection)| Subject {
                key: detection.key(index),
                detection,
            })
            .collect();
        let person_count = subjects
            .iter()
            .filter(|s| is_person(&s.detection.class_name))
            .count();
        let batch = Batch {
            subjects,
            images,
            camera_id: context.camera_id.as_deref(),
            person_count,
        };

        let mut aggregate = AggregateResult::new(batch_id);
        aggregate.subjects = batch
            .subjects
            .iter()
            .map(|s| (s.key.clone(), s.detection.class_name.clone()))
            .collect();
        debug!(
            total = detections.len(),
            kept = batch.subjects.len(),
            min_confidence = self.config.min_confidence,
            "confidence filter applied"
        );

        for stage in Stage::ORDER {
            if self.config.disabled_stages.contains(&stage) {
                continue;
            }
            self.run_stage(stage, &batch, &mut aggregate).await;
        }

        aggregate.processing_ms = started.elapsed().as_millis() as u64;
        info!(
            errors = aggregate.errors.len(),
            latency_ms = aggregate.processing_ms,
            "batch enriched"
        );
        Ok(aggregate)
    }

    fn plan<'b, 'a>(&self, stage: Stage, batch: &'b Batch<'a>) -> Option<Work<'b, 'a>> {
        if batch.subjects.is_empty() {
            return None;
        }
        match stage.scope() {
            StageScope::PerDetection(filter) => {
                let targets: Vec<_> = batch
                    .subjects
                    .iter()
                    .filter(|s| filter.matches(&s.detection.class_name))
                    .collect();
                (!targets.is_empty()).then_some(Work::Detections(targets))
            }
            StageScope::Frame => {
                if batch.person_count < stage.min_persons() {
                    return None;
                }
                if stage.needs_camera() && batch.camera_id.is_none() {
                    return None;
                }
                Some(Work::Frame)
            }
        }
    }

    fn backing(&self, stage: Stage) -> Option<Backing<'_>> {
        let remote = if self.config.use_remote && stage.supports_remote() {
            self.analyzers.remote(stage).map(Backing::Remote)
        } else {
            None
        };
        remote.or_else(|| self.analyzers.local(stage).map(Backing::Local))
    }

    async fn run_stage(&self, stage: Stage, batch: &Batch<'_>, aggregate: &mut AggregateResult) {
        let Some(work) = self.plan(stage, batch) else {
            return;
        };
        let Some(backing) = self.backing(stage) else {
            debug!(stage = stage.name(), "no analyzer bound, stage skipped");
            return;
        };

        let span = StageSpan::new(stage.name(), backing.label(), work.len());
        let outcomes = match backing {
            Backing::Local(binding) => {
                self.run_local(stage, binding, &work, batch, aggregate)
                    .instrument(span.clone())
                    .await
            }
            Backing::Remote(remote) => {
                self.run_remote(remote.as_ref(), &work, batch)
                    .instrument(span.clone())
                    .await
            }
        };

        let _entered = span.enter();
        let errors_before = aggregate.errors.len();
        for (key, outcome) in outcomes {
            absorb(stage, key, outcome, aggregate);
        }
        span.record("errors", aggregate.errors.len() - errors_before);
    }

    /// Lease the binding's resources, run the analyzer per input off the
    /// async loop, then release every lease.
    async fn run_local(
        &self,
        stage: Stage,
        binding: &StageBinding,
        work: &Work<'_, '_>,
        batch: &Batch<'_>,
        aggregate: &AggregateResult,
    ) -> Vec<Outcome> {
        let mut leases: Vec<Lease> = Vec::with_capacity(binding.resources.len());
        for name in &binding.resources {
            match self.manager.acquire(name).await {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    release_leases(leases).await;
                    return vec![(None, Err(e.into()))];
                }
            }
        }

        let handles: Arc<[ResourceHandle]> = leases.iter().map(|l| l.handle().clone()).collect();
        let calls = build_inputs(stage, work, batch, aggregate)
            .into_iter()
            .map(|(key, input)| {
                let analyzer = binding.analyzer.clone();
                let handles = handles.clone();
                async move {
                    let outcome = tokio::task::spawn_blocking(move || {
                        analyzer.analyze(&handles, &input)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(AnalyzerError::Failed(format!("analyzer task aborted: {e}")))
                    });
                    (key, outcome.map_err(EnrichError::from))
                }
            });
        let outcomes = join_all(calls).await;

        drop(handles);
        release_leases(leases).await;
        outcomes
    }

    async fn run_remote(
        &self,
        remote: &dyn RemoteAnalyzer,
        work: &Work<'_, '_>,
        batch: &Batch<'_>,
    ) -> Vec<Outcome> {
        let image = batch.primary_image();
        match work {
            Work::Detections(targets) => {
                let calls = targets.iter().map(|subject| async move {
                    let outcome = remote.analyze(image, Some(subject.detection.bbox)).await;
                    (Some(subject.key.clone()), outcome.map_err(EnrichError::from))
                });
                join_all(calls).await
            }
            Work::Frame => {
                let outcome = remote.analyze(image, None).await;
                vec![(None, outcome.map_err(EnrichError::from))]
            }
        }
    }

    /// Preload every resource a local, enabled stage would lease.
    pub async fn warm_up(&self) -> WarmUpReport {
        let mut names = Vec::new();
        for stage in Stage::ORDER {
            if self.config.disabled_stages.contains(&stage) {
                continue;
            }
            if let Some(Backing::Local(binding)) = self.backing(stage) {
                for name in &binding.resources {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }

        let mut report = WarmUpReport::default();
        for name in names {
            match self.manager.preload(&name).await {
                Ok(()) => report.loaded.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "warm-up complete"
        );
        report
    }

    /// Drop the references taken by a warm-up.
    pub async fn cool_down(&self, report: &WarmUpReport) {
        for name in &report.loaded {
            self.manager.release(name).await;
        }
    }
}

fn build_inputs(
    stage: Stage,
    work: &Work<'_, '_>,
    batch: &Batch<'_>,
    aggregate: &AggregateResult,
) -> Vec<(Option<String>, AnalyzerInput)> {
    match work {
        Work::Detections(targets) => targets
            .iter()
            .map(|subject| {
                let attributes = match stage {
                    Stage::Reidentification => aggregate.vision.get(&subject.key).cloned(),
                    _ => None,
                };
                let input = AnalyzerInput::Detection {
                    key: subject.key.clone(),
                    image: batch.primary_image().clone(),
                    detection: subject.detection.clone(),
                    attributes,
                };
                (Some(subject.key.clone()), input)
            })
            .collect(),
        Work::Frame => vec![(
            None,
            AnalyzerInput::Frame {
                images: batch.images.to_vec(),
                camera_id: batch.camera_id.map(str::to_string),
                person_count: batch.person_count,
            },
        )],
    }
}

fn absorb(
    stage: Stage,
    key: Option<String>,
    outcome: Result<StageOutput, EnrichError>,
    aggregate: &mut AggregateResult,
) {
    let merged = outcome.and_then(|output| {
        aggregate
            .merge(stage, key.as_deref(), output)
            .map_err(EnrichError::from)
    });
    if let Err(e) = merged {
        let detection = key.as_deref().unwrap_or("-");
        let level = absorbed_level(&e);
        if level == Level::ERROR {
            error!(stage = stage.name(), detection, error = %e, "stage error absorbed");
        } else if level == Level::INFO {
            info!(stage = stage.name(), detection, error = %e, "stage degraded");
        } else {
            warn!(stage = stage.name(), detection, error = %e, "stage error absorbed");
        }
        let message = match &key {
            Some(key) => format!("{stage} failed for detection {key}: {e}"),
            None => format!("{stage} failed: {e}"),
        };
        aggregate.record_error(message);
    }
}

/// Expected degradation logs at info. Misconfiguration and broken
/// resources log at error. Analyzer failures stay at warn.
fn absorbed_level(e: &EnrichError) -> Level {
    if e.is_warning() {
        Level::INFO
    } else if e.is_configuration() || matches!(e, EnrichError::LoadFailure { .. }) {
        Level::ERROR
    } else {
        Level::WARN
    }
}

async fn release_leases(leases: Vec<Lease>) {
    for lease in leases {
        lease.release().await;
    }
}
