//! Detection batch inputs and validation.
//!
//! Inputs are validated before any stage runs. Structurally invalid
//! batches are rejected, not repaired.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::EnrichError;
use super::output::VisionAttributes;

pub const PERSON_CLASS: &str = "person";

/// Classes that carry plates and feed vehicle stages.
pub const VEHICLE_CLASSES: &[&str] = &["car", "truck", "bus", "motorcycle"];

/// Classes that feed the pet stage.
pub const PET_CLASSES: &[&str] = &["cat", "dog"];

pub fn is_person(class_name: &str) -> bool {
    class_name == PERSON_CLASS
}

pub fn is_vehicle(class_name: &str) -> bool {
    VEHICLE_CLASSES.contains(&class_name)
}

pub fn is_pet(class_name: &str) -> bool {
    PET_CLASSES.contains(&class_name)
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && self.x2 >= self.x1
            && self.y2 >= self.y1
    }
}

/// One object detection from the upstream detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub id: Option<u64>,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Stable aggregate key: the id, or `#<index>` in the original batch.
    pub fn key(&self, index: usize) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => format!("#{index}"),
        }
    }

    pub fn validate(&self) -> Result<(), EnrichError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(EnrichError::InvalidInput(format!(
                "confidence out of range: {}",
                self.confidence
            )));
        }
        if !self.bbox.is_well_formed() {
            return Err(EnrichError::InvalidInput(format!(
                "malformed bounding box: {:?}",
                self.bbox
            )));
        }
        Ok(())
    }
}

/// Encoded frame pixels shared by every stage of a batch.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl FrameImage {
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
        }
    }
}

/// Per-batch context supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchContext {
    #[serde(default)]
    pub camera_id: Option<String>,
}

impl BatchContext {
    pub fn for_camera(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: Some(camera_id.into()),
        }
    }

    pub fn validate(&self) -> Result<(), EnrichError> {
        match &self.camera_id {
            Some(id) if id.trim().is_empty() => Err(EnrichError::InvalidInput(
                "camera_id cannot be blank".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// What an analyzer receives.
#[derive(Debug, Clone)]
pub enum AnalyzerInput {
    /// One detection on the frame it came from. `attributes` carries the
    /// vision-extraction output for the same detection, when any.
    Detection {
        key: String,
        image: FrameImage,
        detection: Detection,
        attributes: Option<VisionAttributes>,
    },
    /// The whole batch, for once-per-batch stages.
    Frame {
        images: Vec<FrameImage>,
        camera_id: Option<String>,
        person_count: usize,
    },
}

impl AnalyzerInput {
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Detection { detection, .. } => Some(detection),
            Self::Frame { .. } => None,
        }
    }
}
