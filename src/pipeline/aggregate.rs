//! Aggregate result of one enrichment batch.
//!
//! Built additively by the orchestrator and handed to the caller, who owns
//! it exclusively. Flags, best matches and risk modifiers are derived on
//! demand and never stored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::risk;
use super::stage::Stage;
use crate::engine::analyzer::AnalyzerError;
use crate::engine::output::{
    ClothingClassification, ClothingSegmentation, FaceResult, ImageQuality, PetClassification,
    PlateResult, ReidMatch, SceneChangeResult, StageOutput, VehicleClassification, VehicleDamage,
    ViolenceResult, VisionAttributes, WeatherResult,
};

/// Per-detection maps are keyed by detection key (id, or `#<index>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub batch_id: Uuid,
    /// Class of every detection that passed the confidence filter.
    #[serde(default)]
    pub subjects: BTreeMap<String, String>,
    #[serde(default)]
    pub plates: BTreeMap<String, Vec<PlateResult>>,
    #[serde(default)]
    pub faces: BTreeMap<String, Vec<FaceResult>>,
    #[serde(default)]
    pub vision: BTreeMap<String, VisionAttributes>,
    #[serde(default)]
    pub reid: BTreeMap<String, ReidMatch>,
    #[serde(default)]
    pub scene_change: Option<SceneChangeResult>,
    #[serde(default)]
    pub violence: Option<ViolenceResult>,
    #[serde(default)]
    pub weather: Option<WeatherResult>,
    #[serde(default)]
    pub clothing: BTreeMap<String, ClothingClassification>,
    #[serde(default)]
    pub clothing_segments: BTreeMap<String, ClothingSegmentation>,
    #[serde(default)]
    pub vehicle_damage: BTreeMap<String, VehicleDamage>,
    #[serde(default)]
    pub vehicle_types: BTreeMap<String, VehicleClassification>,
    #[serde(default)]
    pub image_quality: Option<ImageQuality>,
    #[serde(default)]
    pub pets: BTreeMap<String, PetClassification>,
    /// Absorbed stage and detection failures, in the order they happened.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub processing_ms: u64,
}

/// Existence flags derived from an aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFlags {
    pub has_plates: bool,
    pub has_faces: bool,
    pub has_vision: bool,
    pub has_reid_match: bool,
    pub scene_changed: bool,
    pub violence_detected: bool,
    pub has_weather: bool,
    pub has_clothing: bool,
    pub suspicious_attire: bool,
    pub service_uniform: bool,
    pub has_clothing_segments: bool,
    pub has_vehicle_damage: bool,
    pub vehicle_breakage: bool,
    pub has_vehicle_type: bool,
    pub image_degraded: bool,
    pub has_pets: bool,
    pub pet_only_event: bool,
    pub has_errors: bool,
}

/// Everything the batch found about one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub key: String,
    pub class_name: Option<String>,
    /// Highest text-recognition confidence among `plates`.
    pub best_plate: Option<PlateResult>,
    pub plates: Vec<PlateResult>,
    pub faces: Vec<FaceResult>,
    pub vision: Option<VisionAttributes>,
    pub reid: Option<ReidMatch>,
    pub clothing: Option<ClothingClassification>,
    pub clothing_segments: Option<ClothingSegmentation>,
    pub vehicle_damage: Option<VehicleDamage>,
    pub vehicle_type: Option<VehicleClassification>,
    pub pet: Option<PetClassification>,
}

impl AggregateResult {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            ..Self::default()
        }
    }

    /// Merge one analyzer output. Per-detection stages need `key`.
    pub(crate) fn merge(
        &mut self,
        stage: Stage,
        key: Option<&str>,
        output: StageOutput,
    ) -> Result<(), AnalyzerError> {
        let keyed = |key: Option<&str>| {
            key.map(str::to_string).ok_or_else(|| {
                AnalyzerError::UnsupportedInput(format!("{stage} output without a detection key"))
            })
        };

        match (stage, output) {
            (Stage::Plates, StageOutput::Plates(plates)) => {
                if !plates.is_empty() {
                    self.plates.entry(keyed(key)?).or_default().extend(plates);
                }
            }
            (Stage::Faces, StageOutput::Faces(faces)) => {
                if !faces.is_empty() {
                    self.faces.entry(keyed(key)?).or_default().extend(faces);
                }
            }
            (Stage::VisionExtraction, StageOutput::Vision(attrs)) => {
                self.vision.insert(keyed(key)?, attrs);
            }
            (Stage::Reidentification, StageOutput::Reid(m)) => {
                self.reid.insert(keyed(key)?, m);
            }
            (Stage::SceneChange, StageOutput::SceneChange(s)) => self.scene_change = Some(s),
            (Stage::Violence, StageOutput::Violence(v)) => self.violence = Some(v),
            (Stage::Weather, StageOutput::Weather(w)) => self.weather = Some(w),
            (Stage::ClothingClassification, StageOutput::Clothing(c)) => {
                self.clothing.insert(keyed(key)?, c);
            }
            (Stage::ClothingSegmentation, StageOutput::ClothingSegments(s)) => {
                if !s.segments.is_empty() {
                    self.clothing_segments.insert(keyed(key)?, s);
                }
            }
            (Stage::VehicleDamage, StageOutput::VehicleDamage(d)) => {
                if !d.damage_types.is_empty() {
                    self.vehicle_damage.insert(keyed(key)?, d);
                }
            }
            (Stage::VehicleClassification, StageOutput::VehicleType(v)) => {
                self.vehicle_types.insert(keyed(key)?, v);
            }
            (Stage::ImageQuality, StageOutput::ImageQuality(q)) => self.image_quality = Some(q),
            (Stage::PetClassification, StageOutput::Pet(p)) => {
                self.pets.insert(keyed(key)?, p);
            }
            (stage, other) => {
                return Err(AnalyzerError::UnsupportedInput(format!(
                    "{stage} analyzer returned {} output",
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn record_error(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn has_plates(&self) -> bool {
        !self.plates.is_empty()
    }

    pub fn has_faces(&self) -> bool {
        !self.faces.is_empty()
    }

    pub fn has_vehicle_damage(&self) -> bool {
        !self.vehicle_damage.is_empty()
    }

    pub fn has_pets(&self) -> bool {
        !self.pets.is_empty()
    }

    pub fn violence_detected(&self) -> bool {
        risk::confirmed_violence(self).is_some()
    }

    pub fn pet_only_event(&self) -> bool {
        risk::is_pet_only(self)
    }

    /// No stage data and no errors.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
            && self.detection_keys().is_empty()
            && self.scene_change.is_none()
            && self.violence.is_none()
            && self.weather.is_none()
            && self.image_quality.is_none()
            && self.errors.is_empty()
    }

    pub fn flags(&self) -> AggregateFlags {
        AggregateFlags {
            has_plates: self.has_plates(),
            has_faces: self.has_faces(),
            has_vision: !self.vision.is_empty(),
            has_reid_match: self.reid.values().any(|m| m.entity_id.is_some()),
            scene_changed: self.scene_change.as_ref().is_some_and(|s| s.changed),
            violence_detected: self.violence_detected(),
            has_weather: self.weather.is_some(),
            has_clothing: !self.clothing.is_empty(),
            suspicious_attire: self.clothing.values().any(|c| c.is_suspicious),
            service_uniform: self.clothing.values().any(|c| c.is_service_uniform),
            has_clothing_segments: !self.clothing_segments.is_empty(),
            has_vehicle_damage: self.has_vehicle_damage(),
            vehicle_breakage: self.vehicle_damage.values().any(VehicleDamage::has_breakage),
            has_vehicle_type: !self.vehicle_types.is_empty(),
            image_degraded: self.image_quality.as_ref().is_some_and(|q| q.is_degraded),
            has_pets: self.has_pets(),
            pet_only_event: self.pet_only_event(),
            has_errors: !self.errors.is_empty(),
        }
    }

    /// The plate with the highest text-recognition confidence for a detection.
    pub fn best_plate(&self, key: &str) -> Option<&PlateResult> {
        self.plates
            .get(key)?
            .iter()
            .max_by(|a, b| a.ocr_confidence.total_cmp(&b.ocr_confidence))
    }

    /// Best plate per detection.
    pub fn best_plates(&self) -> BTreeMap<&str, &PlateResult> {
        self.plates
            .keys()
            .filter_map(|key| Some((key.as_str(), self.best_plate(key)?)))
            .collect()
    }

    pub fn risk_modifiers(&self) -> BTreeMap<String, f32> {
        risk::risk_modifiers(self)
    }

    /// Every detection key referenced by per-detection stage data.
    pub fn detection_keys(&self) -> BTreeSet<&str> {
        let mut keys = BTreeSet::new();
        keys.extend(self.plates.keys().map(String::as_str));
        keys.extend(self.faces.keys().map(String::as_str));
        keys.extend(self.vision.keys().map(String::as_str));
        keys.extend(self.reid.keys().map(String::as_str));
        keys.extend(self.clothing.keys().map(String::as_str));
        keys.extend(self.clothing_segments.keys().map(String::as_str));
        keys.extend(self.vehicle_damage.keys().map(String::as_str));
        keys.extend(self.vehicle_types.keys().map(String::as_str));
        keys.extend(self.pets.keys().map(String::as_str));
        keys
    }

    /// Flatten every stage's data for one detection. `None` means no stage
    /// produced anything for it.
    pub fn detection(&self, key: &str) -> Option<DetectionRecord> {
        if !self.detection_keys().contains(key) {
            return None;
        }
        Some(DetectionRecord {
            key: key.to_string(),
            class_name: self.subjects.get(key).cloned(),
            best_plate: self.best_plate(key).cloned(),
            plates: self.plates.get(key).cloned().unwrap_or_default(),
            faces: self.faces.get(key).cloned().unwrap_or_default(),
            vision: self.vision.get(key).cloned(),
            reid: self.reid.get(key).cloned(),
            clothing: self.clothing.get(key).cloned(),
            clothing_segments: self.clothing_segments.get(key).cloned(),
            vehicle_damage: self.vehicle_damage.get(key).cloned(),
            vehicle_type: self.vehicle_types.get(key).cloned(),
            pet: self.pets.get(key).cloned(),
        })
    }
}
