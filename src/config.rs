//! Configuration loading from environment variables and an optional TOML file.
//!
//! Values come from `ENRICH_*` environment variables, then the config file,
//! then defaults. Invalid values fall back without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `ENRICH_MIN_CONFIDENCE` | 0.5 | Detections below this skip every stage |
//! | `ENRICH_USE_REMOTE` | false | Serve vehicle/pet/clothing stages remotely |
//! | `ENRICH_MODEL_DIR` | models | Base directory for resource paths |
//! | `ENRICH_CAPACITY_BUDGET_MB` | 8192 | Reported capacity budget (MB) |
//! | `ENRICH_DISABLED_STAGES` | (empty) | Comma-separated stage names to skip |
//! | `ENRICH_LOG_LEVEL` | info | Log filter directive |
//! | `ENRICH_LOG_FORMAT` | json | `json` or `pretty` |
//! | `ENRICH_LOG_FILE` | (stderr) | Log output file |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::ResourceManagerConfig;
use crate::pipeline::{OrchestratorConfig, Stage};
use crate::telemetry::{LogConfig, LogFormat};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_BUDGET_MB: u64 = 8 * 1024;
const MIN_BUDGET_MB: u64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Invalid config file: {0}")]
    Parse(String),
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub min_confidence: Option<f32>,
    pub use_remote: Option<bool>,
    pub model_dir: Option<PathBuf>,
    pub capacity_budget_mb: Option<u64>,
    pub disabled_stages: Option<Vec<String>>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub min_confidence: f32,
    pub use_remote: bool,
    pub model_dir: PathBuf,
    pub capacity_budget_mb: u64,
    pub disabled_stages: Vec<String>,
    pub log_level: String,
}

/// All configuration, resolved.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub min_confidence: f32,
    pub use_remote: bool,
    pub model_dir: PathBuf,
    pub capacity_budget_mb: u64,
    pub disabled_stages: BTreeSet<Stage>,
    pub log: LogConfig,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an `f32` env var, returning `fallback` on missing or invalid.
fn parse_f32(key: &str, fallback: f32) -> f32 {
    match env_var(key) {
        Some(val) => val.trim().parse::<f32>().ok().filter(|v| v.is_finite()).unwrap_or(fallback),
        None => fallback,
    }
}

/// Parse a `u64` env var, returning `fallback` on missing or invalid.
fn parse_u64(key: &str, fallback: u64) -> u64 {
    match env_var(key) {
        Some(val) => val.trim().parse::<u64>().unwrap_or(fallback),
        None => fallback,
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`).
fn parse_bool(key: &str, fallback: bool) -> bool {
    match env_var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => fallback,
    }
}

/// Unknown names are logged and dropped.
fn parse_stages<S: AsRef<str>>(names: &[S]) -> BTreeSet<Stage> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|n| !n.trim().is_empty())
        .filter_map(|name| match name.parse::<Stage>() {
            Ok(stage) => Some(stage),
            Err(e) => {
                warn!(error = %e, "ignoring unknown stage in disabled list");
                None
            }
        })
        .collect()
}

fn load_log_config(file: &FileConfig) -> LogConfig {
    let defaults = LogConfig::default();
    let level = env_var("ENRICH_LOG_LEVEL")
        .or_else(|| file.log_level.clone())
        .unwrap_or(defaults.level);
    let format = env_var("ENRICH_LOG_FORMAT")
        .or_else(|| file.log_format.clone())
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or(defaults.format);
    let output_path = env_var("ENRICH_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| file.log_file.clone());
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Resolve configuration over a file layer.
pub fn load_layered(file: FileConfig) -> EnvConfig {
    let min_confidence = parse_f32(
        "ENRICH_MIN_CONFIDENCE",
        file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
    );
    let min_confidence = if min_confidence.is_finite() {
        min_confidence.clamp(0.0, 1.0)
    } else {
        DEFAULT_MIN_CONFIDENCE
    };

    let use_remote = parse_bool("ENRICH_USE_REMOTE", file.use_remote.unwrap_or(false));
    let model_dir = env_var("ENRICH_MODEL_DIR")
        .map(PathBuf::from)
        .or_else(|| file.model_dir.clone())
        .unwrap_or_else(|| PathBuf::from("models"));
    let budget = parse_u64(
        "ENRICH_CAPACITY_BUDGET_MB",
        file.capacity_budget_mb.unwrap_or(DEFAULT_BUDGET_MB),
    );
    let capacity_budget_mb = budget.max(MIN_BUDGET_MB);

    let disabled_stages = match env_var("ENRICH_DISABLED_STAGES") {
        Some(list) => parse_stages(&list.split(',').collect::<Vec<_>>()),
        None => parse_stages(file.disabled_stages.as_deref().unwrap_or_default()),
    };

    EnvConfig {
        min_confidence,
        use_remote,
        model_dir,
        capacity_budget_mb,
        disabled_stages,
        log: load_log_config(&file),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    load_layered(FileConfig::default())
}

/// Load configuration with a TOML file underneath the environment.
pub fn load_with_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    Ok(load_layered(FileConfig::from_file(path)?))
}

impl EnvConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            min_confidence: self.min_confidence,
            use_remote: self.use_remote,
            disabled_stages: self.disabled_stages.clone(),
        }
    }

    pub fn manager_config(&self) -> ResourceManagerConfig {
        ResourceManagerConfig {
            resource_dir: self.model_dir.clone(),
            capacity_budget_mb: Some(self.capacity_budget_mb),
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            min_confidence: self.min_confidence,
            use_remote: self.use_remote,
            model_dir: self.model_dir.clone(),
            capacity_budget_mb: self.capacity_budget_mb,
            disabled_stages: self.disabled_stages.iter().map(|s| s.name().to_string()).collect(),
            log_level: self.log.level.clone(),
        }
    }
}
