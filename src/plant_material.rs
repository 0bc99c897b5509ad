use serde_json::{Map, Value};

use crate::models::PlantMaterialData;

/// Chemical-safety questionnaire fields auto-populated from the plant
/// material master. An explicit compile-time mapping from answer key to row
/// accessor, so adding a field is one table entry.
type FieldAccessor = fn(&PlantMaterialData) -> Option<&String>;

pub const FIELD_MAP: &[(&str, FieldAccessor)] = &[
    ("casNumber", |d| d.cas_number.as_ref()),
    ("storageClass", |d| d.storage_class.as_ref()),
    ("hazardClass", |d| d.hazard_class.as_ref()),
    ("flashPoint", |d| d.flash_point.as_ref()),
    ("unNumber", |d| d.un_number.as_ref()),
    ("waterHazardClass", |d| d.water_hazard_class.as_ref()),
];

/// Fills mapped answer fields the plant has not supplied itself. Explicit
/// answers always win over master data.
pub fn apply_defaults(answers: &mut Map<String, Value>, data: &PlantMaterialData) {
    for (field, accessor) in FIELD_MAP {
        let already_set = answers
            .get(*field)
            .map(|value| !value.is_null())
            .unwrap_or(false);
        if already_set {
            continue;
        }
        if let Some(value) = accessor(data) {
            answers.insert((*field).to_string(), Value::String(value.clone()));
        }
    }
}
