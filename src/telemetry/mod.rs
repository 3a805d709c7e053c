//! Telemetry for the enrichment core.
//!
//! Structured logging setup and span helpers. Output goes to stderr or a
//! file; there are no network exporters.

mod logging;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{BatchSpan, SpanExt, StageSpan};
