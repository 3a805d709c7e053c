//! Risk modifier rules.
//!
//! Each rule maps enrichment findings to a signed contribution in [-1, 1]
//! for the external risk scorer. The map is sparse: a rule that does not
//! fire contributes no key.

use std::collections::BTreeMap;

use super::aggregate::AggregateResult;
use crate::engine::input::is_pet;

/// Minimum violence confidence for a confirmed finding.
pub const VIOLENCE_CONFIRM_THRESHOLD: f32 = 0.5;
/// Violence contributes `VIOLENCE_WEIGHT * confidence`.
pub const VIOLENCE_WEIGHT: f32 = 0.8;
/// Minimum classifier confidence for a confirmed household pet.
pub const PET_CONFIRM_THRESHOLD: f32 = 0.6;
pub const PET_ONLY_MODIFIER: f32 = -0.8;
pub const SUSPICIOUS_ATTIRE_MODIFIER: f32 = 0.3;
pub const VEHICLE_BREAKAGE_MODIFIER: f32 = 0.4;
pub const VEHICLE_DAMAGE_MODIFIER: f32 = 0.2;
pub const SERVICE_UNIFORM_MODIFIER: f32 = -0.3;
pub const IMAGE_QUALITY_MODIFIER: f32 = 0.1;

pub const KEY_VIOLENCE: &str = "violence";
pub const KEY_PET_ONLY: &str = "pet_only";
pub const KEY_SUSPICIOUS_ATTIRE: &str = "suspicious_attire";
pub const KEY_VEHICLE_DAMAGE: &str = "vehicle_damage";
pub const KEY_SERVICE_UNIFORM: &str = "service_uniform";
pub const KEY_IMAGE_QUALITY: &str = "image_quality";

/// Confidence of a confirmed violence finding.
pub fn confirmed_violence(result: &AggregateResult) -> Option<f32> {
    result
        .violence
        .as_ref()
        .filter(|v| v.is_violent && v.confidence >= VIOLENCE_CONFIRM_THRESHOLD)
        .map(|v| v.confidence)
}

/// True when the batch holds confirmed household pets and nothing else.
pub fn is_pet_only(result: &AggregateResult) -> bool {
    !result.pets.is_empty()
        && result
            .pets
            .values()
            .all(|p| p.is_household_pet && p.confidence >= PET_CONFIRM_THRESHOLD)
        && result.subjects.values().all(|class| is_pet(class))
        && result.plates.is_empty()
        && result.faces.is_empty()
        && result.reid.is_empty()
        && result.clothing.is_empty()
        && result.clothing_segments.is_empty()
        && result.vehicle_damage.is_empty()
        && result.vehicle_types.is_empty()
        && confirmed_violence(result).is_none()
}

pub fn risk_modifiers(result: &AggregateResult) -> BTreeMap<String, f32> {
    let mut modifiers = BTreeMap::new();

    // Suppresses everything else.
    if is_pet_only(result) {
        modifiers.insert(KEY_PET_ONLY.to_string(), PET_ONLY_MODIFIER);
        return modifiers;
    }

    if let Some(confidence) = confirmed_violence(result) {
        insert_bounded(&mut modifiers, KEY_VIOLENCE, VIOLENCE_WEIGHT * confidence);
    }

    if result.clothing.values().any(|c| c.is_suspicious) {
        insert_bounded(&mut modifiers, KEY_SUSPICIOUS_ATTIRE, SUSPICIOUS_ATTIRE_MODIFIER);
    }

    if result.clothing.values().any(|c| c.is_service_uniform) {
        insert_bounded(&mut modifiers, KEY_SERVICE_UNIFORM, SERVICE_UNIFORM_MODIFIER);
    }

    let damage = result
        .vehicle_damage
        .values()
        .filter(|d| !d.damage_types.is_empty())
        .map(|d| {
            if d.has_breakage() {
                VEHICLE_BREAKAGE_MODIFIER
            } else {
                VEHICLE_DAMAGE_MODIFIER
            }
        })
        .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))));
    if let Some(value) = damage {
        insert_bounded(&mut modifiers, KEY_VEHICLE_DAMAGE, value);
    }

    if result.image_quality.as_ref().is_some_and(|q| q.is_degraded) {
        insert_bounded(&mut modifiers, KEY_IMAGE_QUALITY, IMAGE_QUALITY_MODIFIER);
    }

    modifiers
}

fn insert_bounded(modifiers: &mut BTreeMap<String, f32>, key: &str, value: f32) {
    modifiers.insert(key.to_string(), value.clamp(-1.0, 1.0));
}
