//! Stage result types.
//!
//! Each `StageOutput` variant maps to one pipeline stage. A missing result
//! means "nothing found" or "not run", never an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::input::BoundingBox;

/// A plate read on a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateResult {
    pub text: String,
    /// Plate detector confidence.
    pub confidence: f32,
    /// Text recognition confidence.
    pub ocr_confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub landmarks: Vec<(f32, f32)>,
}

/// Free-form attributes from the vision-extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAttributes {
    pub description: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReidMatch {
    /// Matched known identity, if any.
    pub entity_id: Option<String>,
    pub similarity: f32,
    pub embedding_dims: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneChangeResult {
    pub changed: bool,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolenceResult {
    pub is_violent: bool,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResult {
    pub condition: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothingClassification {
    pub category: String,
    pub confidence: f32,
    /// Masks, balaclavas, hoods up at night, and similar.
    #[serde(default)]
    pub is_suspicious: bool,
    /// Delivery, postal, utility uniforms.
    #[serde(default)]
    pub is_service_uniform: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothingSegment {
    pub label: String,
    /// Fraction of the detection box covered by this item.
    pub coverage: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClothingSegmentation {
    pub segments: Vec<ClothingSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    GlassShatter,
    LampBroken,
    Scratch,
    Dent,
    Crack,
}

impl DamageType {
    /// Breakage associated with forced entry.
    pub fn is_breakage(&self) -> bool {
        matches!(self, Self::GlassShatter | Self::LampBroken)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDamage {
    pub damage_types: Vec<DamageType>,
    pub confidence: f32,
}

impl VehicleDamage {
    pub fn has_breakage(&self) -> bool {
        self.damage_types.iter().any(DamageType::is_breakage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleClassification {
    pub vehicle_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQuality {
    /// 0.0 (unusable) to 1.0 (clean).
    pub score: f32,
    #[serde(default)]
    pub issues: Vec<String>,
    pub is_degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetClassification {
    pub pet_type: String,
    pub confidence: f32,
    pub is_household_pet: bool,
}

/// Tagged analyzer output, one variant per stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Plates(Vec<PlateResult>),
    Faces(Vec<FaceResult>),
    Vision(VisionAttributes),
    Reid(ReidMatch),
    SceneChange(SceneChangeResult),
    Violence(ViolenceResult),
    Weather(WeatherResult),
    Clothing(ClothingClassification),
    ClothingSegments(ClothingSegmentation),
    VehicleDamage(VehicleDamage),
    VehicleType(VehicleClassification),
    ImageQuality(ImageQuality),
    Pet(PetClassification),
}

impl StageOutput {
    /// Variant name, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plates(_) => "plates",
            Self::Faces(_) => "faces",
            Self::Vision(_) => "vision",
            Self::Reid(_) => "reid",
            Self::SceneChange(_) => "scene_change",
            Self::Violence(_) => "violence",
            Self::Weather(_) => "weather",
            Self::Clothing(_) => "clothing",
            Self::ClothingSegments(_) => "clothing_segments",
            Self::VehicleDamage(_) => "vehicle_damage",
            Self::VehicleType(_) => "vehicle_type",
            Self::ImageQuality(_) => "image_quality",
            Self::Pet(_) => "pet",
        }
    }
}
