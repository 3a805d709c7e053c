//! The fixed enrichment stage table.
//!
//! Order matters: re-identification reads vision-extraction attributes, so
//! stages always run in `Stage::ORDER`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::input::{is_person, is_pet, is_vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plates,
    Faces,
    VisionExtraction,
    Reidentification,
    SceneChange,
    Violence,
    Weather,
    ClothingClassification,
    ClothingSegmentation,
    VehicleDamage,
    VehicleClassification,
    ImageQuality,
    PetClassification,
}

/// Which detections a per-detection stage looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFilter {
    Vehicles,
    Persons,
    Pets,
    PersonsAndVehicles,
}

impl ClassFilter {
    pub fn matches(&self, class_name: &str) -> bool {
        match self {
            Self::Vehicles => is_vehicle(class_name),
            Self::Persons => is_person(class_name),
            Self::Pets => is_pet(class_name),
            Self::PersonsAndVehicles => is_person(class_name) || is_vehicle(class_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageScope {
    /// Analyzer runs once per matching detection.
    PerDetection(ClassFilter),
    /// Analyzer runs once per batch on the shared frame.
    Frame,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl Stage {
    /// Execution order.
    pub const ORDER: [Stage; 13] = [
        Stage::Plates,
        Stage::Faces,
        Stage::VisionExtraction,
        Stage::Reidentification,
        Stage::SceneChange,
        Stage::Violence,
        Stage::Weather,
        Stage::ClothingClassification,
        Stage::ClothingSegmentation,
        Stage::VehicleDamage,
        Stage::VehicleClassification,
        Stage::ImageQuality,
        Stage::PetClassification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Plates => "plates",
            Stage::Faces => "faces",
            Stage::VisionExtraction => "vision_extraction",
            Stage::Reidentification => "reidentification",
            Stage::SceneChange => "scene_change",
            Stage::Violence => "violence",
            Stage::Weather => "weather",
            Stage::ClothingClassification => "clothing_classification",
            Stage::ClothingSegmentation => "clothing_segmentation",
            Stage::VehicleDamage => "vehicle_damage",
            Stage::VehicleClassification => "vehicle_classification",
            Stage::ImageQuality => "image_quality",
            Stage::PetClassification => "pet_classification",
        }
    }

    pub fn scope(&self) -> StageScope {
        match self {
            Stage::Plates | Stage::VehicleDamage | Stage::VehicleClassification => {
                StageScope::PerDetection(ClassFilter::Vehicles)
            }
            Stage::Faces | Stage::ClothingClassification | Stage::ClothingSegmentation => {
                StageScope::PerDetection(ClassFilter::Persons)
            }
            Stage::VisionExtraction | Stage::Reidentification => {
                StageScope::PerDetection(ClassFilter::PersonsAndVehicles)
            }
            Stage::PetClassification => StageScope::PerDetection(ClassFilter::Pets),
            Stage::SceneChange | Stage::Violence | Stage::Weather | Stage::ImageQuality => {
                StageScope::Frame
            }
        }
    }

    /// Resources a local binding leases unless overridden.
    pub fn default_resources(&self) -> &'static [&'static str] {
        match self {
            Stage::Plates => &["plate_detector", "plate_reader"],
            Stage::Faces => &["face_detector"],
            Stage::VisionExtraction => &["vision_language"],
            Stage::Reidentification => &["reid_embedder"],
            Stage::SceneChange => &["scene_encoder"],
            Stage::Violence => &["violence_classifier"],
            Stage::Weather => &["weather_classifier"],
            Stage::ClothingClassification => &["clothing_classifier"],
            Stage::ClothingSegmentation => &["clothing_segmenter"],
            Stage::VehicleDamage => &["damage_detector"],
            Stage::VehicleClassification => &["vehicle_classifier"],
            Stage::ImageQuality => &[],
            Stage::PetClassification => &["pet_classifier"],
        }
    }

    pub fn supports_remote(&self) -> bool {
        matches!(
            self,
            Stage::VehicleClassification | Stage::PetClassification | Stage::ClothingClassification
        )
    }

    /// Person detections the filtered batch must hold for the stage to run.
    /// Violence needs an interaction; a lone person never triggers it.
    pub fn min_persons(&self) -> usize {
        match self {
            Stage::Violence => 2,
            _ => 0,
        }
    }

    pub fn needs_camera(&self) -> bool {
        matches!(self, Stage::SceneChange)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Stage::ORDER
            .iter()
            .copied()
            .find(|stage| stage.name() == wanted)
            .ok_or_else(|| UnknownStage(wanted.to_string()))
    }
}
