//! Analyzer boundary for the enrichment core.
//!
//! Input and output types, the analyzer capability traits, and the error
//! taxonomy shared by the pipeline.

pub mod analyzer;
pub mod error;
pub mod input;
pub mod output;

pub use analyzer::{expect_handle, Analyzer, AnalyzerError, RemoteAnalyzer, RemoteError};
pub use error::{EnrichError, LoadFailureKind};
pub use input::{AnalyzerInput, BatchContext, BoundingBox, Detection, FrameImage};
pub use input::{is_person, is_pet, is_vehicle, PERSON_CLASS, PET_CLASSES, VEHICLE_CLASSES};
pub use output::{
    ClothingClassification, ClothingSegment, ClothingSegmentation, DamageType, FaceResult,
    ImageQuality, PetClassification, PlateResult, ReidMatch, SceneChangeResult, StageOutput,
    VehicleClassification, VehicleDamage, ViolenceResult, VisionAttributes, WeatherResult,
};
