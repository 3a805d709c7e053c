//! Span utilities for enrichment tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for batch-level spans.
pub struct BatchSpan;

impl BatchSpan {
    /// Fields `status`, `error.message`, `errors` and `latency_ms` are
    /// filled in when the batch completes.
    pub fn new(batch_id: &str, camera_id: Option<&str>, detections: usize) -> Span {
        info_span!(
            "enrichment_batch",
            batch_id = %batch_id,
            camera_id = camera_id.unwrap_or("-"),
            detections,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            errors = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}

/// Factory for per-stage spans.
pub struct StageSpan;

impl StageSpan {
    pub fn new(stage: &str, backing: &str, applicable: usize) -> Span {
        info_span!(
            "enrichment_stage",
            stage = %stage,
            backing = %backing,
            applicable,
            errors = tracing::field::Empty,
        )
    }
}
