//! Verbatim (harvested) and processed observation records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AreaRef, DiffusionStatus, Point, TaxonAttributes};

/// Provider-native observation as handed over by a harvester
///
/// Known fields are typed; anything provider-specific lands in
/// `extensions` and is left to provider adapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerbatimObservation {
    pub data_provider_id: i32,
    /// Provider-native record id
    pub native_id: String,
    #[serde(default)]
    pub occurrence_id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub decimal_latitude: Option<f64>,
    #[serde(default)]
    pub decimal_longitude: Option<f64>,
    #[serde(default)]
    pub coordinate_uncertainty_in_meters: Option<u32>,
    #[serde(default)]
    pub event_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub event_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub taxon_id: Option<i32>,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub recorded_by: Option<String>,
    #[serde(default)]
    pub activity_id: Option<i32>,
    #[serde(default)]
    pub life_stage_id: Option<i32>,
    /// Provider already generalized the coordinates before delivery
    #[serde(default)]
    pub is_generalized_by_provider: bool,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl VerbatimObservation {
    /// Occurrence id, falling back to a provider-scoped URN of the native id
    pub fn resolved_occurrence_id(&self) -> Option<String> {
        match &self.occurrence_id {
            Some(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
            _ if !self.native_id.trim().is_empty() => Some(format!(
                "urn:lsid:sos:{}:{}",
                self.data_provider_id,
                self.native_id.trim()
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Taxon fields copied into the processed record at processing time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonSnapshot {
    pub id: i32,
    pub scientific_name: String,
    pub vernacular_name: Option<String>,
    /// Attributes after inheritance along the ancestor chain
    pub attributes: TaxonAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub original: Point,
    /// Present only when the coordinates were generalized by the system
    pub diffused: Option<Point>,
    pub diffusion_status: DiffusionStatus,
    pub diffusion_precision_meters: Option<u32>,
    pub coordinate_uncertainty_in_meters: Option<u32>,
    pub county: Option<AreaRef>,
    pub municipality: Option<AreaRef>,
    pub parish: Option<AreaRef>,
    pub province: Option<AreaRef>,
    pub is_in_economic_zone_of_sweden: bool,
    pub locality: Option<String>,
}

impl Location {
    /// Coordinates safe to expose to readers
    pub fn public_point(&self) -> Point {
        self.diffused.unwrap_or(self.original)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDate {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    /// Processed, but enrichment had to fall back somewhere (see warnings)
    ValidWithWarnings,
}

/// Canonical, enriched and possibly diffused observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedObservation {
    pub occurrence_id: String,
    pub data_provider_id: i32,
    pub dataset: Dataset,
    pub taxon: TaxonSnapshot,
    pub location: Location,
    pub event: EventDate,
    pub recorded_by: Option<String>,
    pub activity_id: Option<i32>,
    pub life_stage_id: Option<i32>,
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Rejected verbatim record with one defect per failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidObservation {
    pub data_provider_id: i32,
    /// Storage key: the resolved occurrence id, or the record's source
    /// offset (`offset:{n}`) when the record has no usable id
    #[serde(default)]
    pub record_key: String,
    pub native_id: String,
    pub occurrence_id: Option<String>,
    pub dataset_id: Option<String>,
    pub dataset_name: Option<String>,
    pub defects: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occurrence_id_prefers_provider_value() {
        let verbatim = VerbatimObservation {
            data_provider_id: 1,
            native_id: "42".to_string(),
            occurrence_id: Some(" urn:lsid:artportalen.se:sighting:42 ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            verbatim.resolved_occurrence_id().as_deref(),
            Some("urn:lsid:artportalen.se:sighting:42")
        );
    }

    #[test]
    fn test_occurrence_id_falls_back_to_native_id() {
        let verbatim = VerbatimObservation {
            data_provider_id: 7,
            native_id: "abc".to_string(),
            ..Default::default()
        };
        assert_eq!(verbatim.resolved_occurrence_id().as_deref(), Some("urn:lsid:sos:7:abc"));

        let empty = VerbatimObservation::default();
        assert!(empty.resolved_occurrence_id().is_none());
    }

    #[test]
    fn test_verbatim_residual_fields_deserialize() {
        let json = r#"{
            "data_provider_id": 3,
            "native_id": "n1",
            "decimal_latitude": 59.3,
            "decimal_longitude": 18.1,
            "extensions": { "sightingTypeId": 0 }
        }"#;
        let verbatim: VerbatimObservation = serde_json::from_str(json).unwrap();
        assert_eq!(verbatim.decimal_latitude, Some(59.3));
        assert!(!verbatim.is_generalized_by_provider);
        assert_eq!(verbatim.extensions["sightingTypeId"], serde_json::json!(0));
    }
}
