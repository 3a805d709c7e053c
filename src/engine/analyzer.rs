//! Analyzer capabilities.
//!
//! A local analyzer runs against handles leased from the resource manager
//! and is blocking; the orchestrator dispatches it off the async loop.
//! A remote analyzer talks to an external service and is async.

use std::any::{type_name, Any};
use std::sync::Arc;

use thiserror::Error;

use super::input::{AnalyzerInput, BoundingBox, FrameImage};
use super::output::StageOutput;
use crate::models::ResourceHandle;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("{0}")]
    Failed(String),

    #[error("resource handle {index} is not a {expected}")]
    HandleMismatch { index: usize, expected: &'static str },

    #[error("missing resource handle {0}")]
    MissingHandle(usize),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    #[error("remote analysis failed: {0}")]
    Failed(String),
}

impl RemoteError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Local analyzer over leased resources.
pub trait Analyzer: Send + Sync {
    fn analyze(
        &self,
        handles: &[ResourceHandle],
        input: &AnalyzerInput,
    ) -> Result<StageOutput, AnalyzerError>;
}

impl<F> Analyzer for F
where
    F: Fn(&[ResourceHandle], &AnalyzerInput) -> Result<StageOutput, AnalyzerError> + Send + Sync,
{
    fn analyze(
        &self,
        handles: &[ResourceHandle],
        input: &AnalyzerInput,
    ) -> Result<StageOutput, AnalyzerError> {
        self(handles, input)
    }
}

/// Remote alternative for stages that support one.
#[async_trait::async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        image: &FrameImage,
        bbox: Option<BoundingBox>,
    ) -> Result<StageOutput, RemoteError>;
}

/// Downcast the handle at `index` to the type this analyzer's loader built.
pub fn expect_handle<T: Any + Send + Sync>(
    handles: &[ResourceHandle],
    index: usize,
) -> Result<Arc<T>, AnalyzerError> {
    let handle = handles.get(index).ok_or(AnalyzerError::MissingHandle(index))?;
    handle.downcast::<T>().ok_or(AnalyzerError::HandleMismatch {
        index,
        expected: type_name::<T>(),
    })
}
