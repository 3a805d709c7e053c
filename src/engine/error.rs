//! Error taxonomy for the enrichment core.
//!
//! Resource errors surface to `acquire` callers. Analyzer and remote errors
//! are absorbed by the orchestrator into the aggregate's error list; only
//! `InvalidInput` escapes `process()`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::analyzer::{AnalyzerError, RemoteError};
use crate::models::{LoadError, ResourceError};

/// How a failed load should be read by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// An optional capability that is not installed here.
    MissingOptional,
    Unexpected,
}

impl LoadFailureKind {
    pub fn of(error: &LoadError) -> Self {
        if error.is_expected_missing() {
            Self::MissingOptional
        } else {
            Self::Unexpected
        }
    }
}

/// Errors produced by the enrichment core.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Resource not registered: {0}")]
    NotFound(String),

    #[error("Resource disabled: {0}")]
    Disabled(String),

    #[error("Failed to load {name} ({kind:?}): {message}")]
    LoadFailure {
        name: String,
        kind: LoadFailureKind,
        message: String,
    },

    #[error("Analyzer failed: {0}")]
    AnalyzerFailure(String),

    #[error("Remote analyzer unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EnrichError {
    /// Returns true if this error should be logged as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_)
                | Self::LoadFailure {
                    kind: LoadFailureKind::MissingOptional,
                    ..
                }
        )
    }

    /// Returns true for misconfiguration that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Disabled(_))
    }
}

impl From<ResourceError> for EnrichError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound(name) => Self::NotFound(name),
            ResourceError::Disabled(name) => Self::Disabled(name),
            ResourceError::LoadFailure { name, kind, source } => Self::LoadFailure {
                name,
                kind,
                message: source.to_string(),
            },
        }
    }
}

impl From<AnalyzerError> for EnrichError {
    fn from(err: AnalyzerError) -> Self {
        Self::AnalyzerFailure(err.to_string())
    }
}

impl From<RemoteError> for EnrichError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => Self::RemoteUnavailable(msg),
            RemoteError::Failed(msg) => Self::AnalyzerFailure(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_errors_keep_kind() {
        let missing = ResourceError::LoadFailure {
            name: "plate_reader".into(),
            kind: LoadFailureKind::MissingOptional,
            source: LoadError::MissingDependency("ocr runtime".into()),
        };
        let err = EnrichError::from(missing);
        assert!(err.is_warning());
        assert!(!err.is_configuration());

        let err = EnrichError::from(ResourceError::Disabled("faces".into()));
        assert!(err.is_configuration());
        assert!(!err.is_warning());
    }

    #[test]
    fn test_remote_unavailable_is_distinct() {
        let unavailable = RemoteError::Unavailable("timeout".into());
        assert!(unavailable.is_unavailable());
        assert!(matches!(
            EnrichError::from(unavailable),
            EnrichError::RemoteUnavailable(_)
        ));

        let failed = RemoteError::Failed("bad payload".into());
        assert!(!failed.is_unavailable());
        assert!(matches!(EnrichError::from(failed), EnrichError::AnalyzerFailure(_)));
    }

    #[test]
    fn test_load_failure_kind_of() {
        assert_eq!(
            LoadFailureKind::of(&LoadError::NotFound("x.onnx".into())),
            LoadFailureKind::MissingOptional
        );
        assert_eq!(
            LoadFailureKind::of(&LoadError::InvalidFormat("header".into())),
            LoadFailureKind::Unexpected
        );
    }
}
