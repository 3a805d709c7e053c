//! Enrichment pipeline.
//!
//! The stage table, the orchestrator that drives a batch through it, and
//! the aggregate result with its derived risk modifiers.

pub mod aggregate;
pub mod orchestrator;
pub mod risk;
pub mod stage;

pub use aggregate::{AggregateFlags, AggregateResult, DetectionRecord};
pub use orchestrator::{AnalyzerTable, Orchestrator, OrchestratorConfig, StageBinding, WarmUpReport};
pub use stage::{ClassFilter, Stage, StageScope, UnknownStage};
