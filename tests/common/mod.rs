//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enrich_core::engine::{
    AnalyzerError, AnalyzerInput, BoundingBox, Detection, FrameImage, RemoteAnalyzer, RemoteError,
    StageOutput,
};
use enrich_core::models::{
    CacheClearHook, LoadError, ResourceCatalog, ResourceCategory, ResourceDescriptor,
    ResourceHandle, ResourceLoader,
};
use parking_lot::Mutex;

/// How a [`CountingLoader`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Never,
    MissingDependency,
    Broken,
}

/// Concrete resource produced by the loader.
#[derive(Debug)]
pub struct FakeResource {
    pub path: PathBuf,
}

/// Loader that counts physical loads and unloads.
pub struct CountingLoader {
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
    pub delay: Duration,
    pub fail: Mutex<FailMode>,
    pub paths: Mutex<Vec<PathBuf>>,
}

impl CountingLoader {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            delay,
            fail: Mutex::new(FailMode::Never),
            paths: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(mode: FailMode) -> Arc<Self> {
        let loader = Self::new();
        *loader.fail.lock() = mode;
        loader
    }

    pub fn set_fail(&self, mode: FailMode) {
        *self.fail.lock() = mode;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

impl ResourceLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<ResourceHandle, LoadError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match *self.fail.lock() {
            FailMode::MissingDependency => {
                return Err(LoadError::MissingDependency("fake-runtime".into()))
            }
            FailMode::Broken => return Err(LoadError::Failed("corrupt weights".into())),
            FailMode::Never => {}
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().push(path.to_path_buf());
        Ok(ResourceHandle::new(FakeResource {
            path: path.to_path_buf(),
        }))
    }

    fn unload(&self, handle: ResourceHandle) -> Result<(), LoadError> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        drop(handle);
        Ok(())
    }
}

/// Cache hook that always fails and counts calls.
#[derive(Default)]
pub struct FailingCacheHook {
    pub calls: AtomicUsize,
}

impl CacheClearHook for FailingCacheHook {
    fn clear(&self) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("no accelerator present".into())
    }
}

pub fn descriptor(name: &str, cost_mb: u64, loader: Arc<CountingLoader>) -> ResourceDescriptor {
    ResourceDescriptor::new(
        name,
        format!("{name}.bin"),
        cost_mb,
        ResourceCategory::Classifier,
        loader,
    )
}

/// Catalog with every default stage resource registered on one loader.
pub fn full_catalog(loader: Arc<CountingLoader>) -> Arc<ResourceCatalog> {
    let catalog = ResourceCatalog::new();
    for name in [
        "plate_detector",
        "plate_reader",
        "face_detector",
        "vision_language",
        "reid_embedder",
        "scene_encoder",
        "violence_classifier",
        "weather_classifier",
        "clothing_classifier",
        "clothing_segmenter",
        "damage_detector",
        "vehicle_classifier",
        "pet_classifier",
    ] {
        catalog.register(descriptor(name, 100, loader.clone()));
    }
    Arc::new(catalog)
}

pub fn frame() -> FrameImage {
    FrameImage::new(640, 480, vec![0u8; 16])
}

pub fn detection(class_name: &str, confidence: f32, id: u64) -> Detection {
    Detection::new(class_name, confidence, BoundingBox::new(10.0, 10.0, 110.0, 210.0)).with_id(id)
}

/// Key of the detection an input is about, or "frame".
pub fn input_key(input: &AnalyzerInput) -> String {
    match input {
        AnalyzerInput::Detection { key, .. } => key.clone(),
        AnalyzerInput::Frame { .. } => "frame".into(),
    }
}

/// Wrap a closure as a shareable analyzer.
pub fn analyzer<F>(f: F) -> Arc<dyn enrich_core::engine::Analyzer>
where
    F: Fn(&[ResourceHandle], &AnalyzerInput) -> Result<StageOutput, AnalyzerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Remote analyzer returning a fixed result or an outage.
pub struct ScriptedRemote {
    pub output: Option<StageOutput>,
    pub calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn returning(output: StageOutput) -> Arc<Self> {
        Arc::new(Self {
            output: Some(output),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            output: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl RemoteAnalyzer for ScriptedRemote {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(
        &self,
        _image: &FrameImage,
        _bbox: Option<BoundingBox>,
    ) -> Result<StageOutput, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output
            .clone()
            .ok_or_else(|| RemoteError::Unavailable("connection refused".into()))
    }
}
