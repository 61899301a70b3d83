//! Observation Transformer
//!
//! Turns one verbatim record into a canonical processed observation, or
//! into an invalid observation listing every failed check. Pure: the
//! result depends only on the record and the shared context, so
//! transforming the same record twice gives equal output.

use std::sync::Arc;

use chrono::NaiveDate;

use sos_common::models::{
    Dataset, DiffusionStatus, EventDate, InvalidObservation, Location, Point,
    ProcessedObservation, Taxon, TaxonSnapshot, ValidationStatus, VerbatimObservation,
};

use crate::area_resolver::AreaSnapshot;
use crate::diffusion::{grid, DiffusionRuleEngine};
use crate::taxon_index::TaxonIndex;

pub const DEFECT_MISSING_OCCURRENCE_ID: &str = "missing occurrence id";
pub const DEFECT_MISSING_COORDINATE: &str = "missing coordinate";
pub const DEFECT_COORDINATE_OUT_OF_RANGE: &str = "coordinate out of range";
pub const DEFECT_MISSING_TAXON: &str = "missing taxon";
pub const DEFECT_MISSING_EVENT_DATE: &str = "missing event date";
pub const DEFECT_EVENT_DATES_REVERSED: &str = "event end date before start date";
pub const DEFECT_NOT_GENERALIZABLE: &str = "coordinate could not be generalized";

/// Read-only enrichment state shared by every worker of a run
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub taxa: Arc<TaxonIndex>,
    pub areas: Arc<AreaSnapshot>,
    pub rules: Arc<DiffusionRuleEngine>,
}

impl TransformContext {
    pub fn transform(
        &self,
        verbatim: &VerbatimObservation,
    ) -> Result<ProcessedObservation, InvalidObservation> {
        transform(verbatim, &self.taxa, &self.areas, &self.rules)
    }

    pub fn transform_with_diagnostics(
        &self,
        verbatim: &VerbatimObservation,
    ) -> (Result<ProcessedObservation, InvalidObservation>, TransformDiagnostics) {
        transform_with_diagnostics(verbatim, &self.taxa, &self.areas, &self.rules)
    }
}

/// Side facts of one transformation, aggregated into run statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformDiagnostics {
    /// Same-type area overlaps at the observation point
    pub area_overlaps: usize,
    /// Coordinates were generalized by the system
    pub diffused: bool,
    /// Diffusion was forced because the taxon's rules were unreadable
    pub diffusion_fail_safe: bool,
    /// Taxon was found by scientific name rather than id
    pub taxon_resolved_by_name: bool,
}

pub fn transform(
    verbatim: &VerbatimObservation,
    taxa: &TaxonIndex,
    areas: &AreaSnapshot,
    rules: &DiffusionRuleEngine,
) -> Result<ProcessedObservation, InvalidObservation> {
    transform_with_diagnostics(verbatim, taxa, areas, rules).0
}

struct Validated<'a> {
    occurrence_id: String,
    point: Point,
    taxon: &'a Taxon,
    event: EventDate,
}

pub fn transform_with_diagnostics(
    verbatim: &VerbatimObservation,
    taxa: &TaxonIndex,
    areas: &AreaSnapshot,
    rules: &DiffusionRuleEngine,
) -> (Result<ProcessedObservation, InvalidObservation>, TransformDiagnostics) {
    let mut diagnostics = TransformDiagnostics::default();

    let validated = match validate(verbatim, taxa, &mut diagnostics) {
        Ok(validated) => validated,
        Err(defects) => return (Err(invalid_observation(verbatim, defects)), diagnostics),
    };

    let mut warnings = Vec::new();

    let attributes = taxa
        .resolved_attributes(validated.taxon.id)
        .cloned()
        .unwrap_or_else(|_| validated.taxon.attributes.clone());

    let at_original = areas.resolve(validated.point);
    diagnostics.area_overlaps = at_original.overlaps().len();
    for overlap in at_original.overlaps() {
        warnings.push(format!(
            "overlapping {} areas {} and {}",
            overlap.area_type, overlap.chosen_area_id, overlap.other_area_id
        ));
    }

    let mut diffused = None;
    let mut diffusion_precision_meters = None;
    let mut coordinate_uncertainty_in_meters = verbatim.coordinate_uncertainty_in_meters;

    let diffusion_status = if verbatim.is_generalized_by_provider {
        DiffusionStatus::DiffusedByProvider
    } else {
        let decision = rules.evaluate(
            validated.taxon.id,
            validated.event.start_date,
            verbatim.activity_id,
            verbatim.life_stage_id,
            &at_original,
        );
        if decision.fail_safe {
            diagnostics.diffusion_fail_safe = true;
            warnings.push("diffusion rules unreadable, fail-safe precision applied".to_string());
        }

        match decision.precision_meters.filter(|_| decision.must_diffuse) {
            Some(precision) => {
                // Publishing the original point is never an option for a protected record
                let Some(generalized) = grid::generalize(validated.point, precision) else {
                    let defects = vec![DEFECT_NOT_GENERALIZABLE.to_string()];
                    return (Err(invalid_observation(verbatim, defects)), diagnostics);
                };
                diagnostics.diffused = true;
                diffused = Some(generalized);
                diffusion_precision_meters = Some(precision);
                coordinate_uncertainty_in_meters =
                    Some(coordinate_uncertainty_in_meters.unwrap_or(0).max(precision));
                DiffusionStatus::DiffusedBySystem
            }
            None => DiffusionStatus::NotDiffused,
        }
    };

    // Published area references must not be finer than the published point
    let public_areas = match diffused {
        Some(point) => areas.resolve(point),
        None => at_original,
    };

    let location = Location {
        original: validated.point,
        diffused,
        diffusion_status,
        diffusion_precision_meters,
        coordinate_uncertainty_in_meters,
        county: public_areas.county().cloned(),
        municipality: public_areas.municipality().cloned(),
        parish: public_areas.parish().cloned(),
        province: public_areas.province().cloned(),
        is_in_economic_zone_of_sweden: public_areas.is_in_economic_zone_of_sweden(),
        locality: verbatim.locality.clone(),
    };

    let validation_status = if warnings.is_empty() {
        ValidationStatus::Valid
    } else {
        ValidationStatus::ValidWithWarnings
    };

    let processed = ProcessedObservation {
        occurrence_id: validated.occurrence_id,
        data_provider_id: verbatim.data_provider_id,
        dataset: Dataset {
            id: verbatim.dataset_id.clone(),
            name: verbatim.dataset_name.clone(),
        },
        taxon: TaxonSnapshot {
            id: validated.taxon.id,
            scientific_name: validated.taxon.scientific_name.clone(),
            vernacular_name: validated.taxon.vernacular_name.clone(),
            attributes,
        },
        location,
        event: validated.event,
        recorded_by: verbatim.recorded_by.clone(),
        activity_id: verbatim.activity_id,
        life_stage_id: verbatim.life_stage_id,
        validation_status,
        warnings,
    };

    (Ok(processed), diagnostics)
}

/// The record key is left empty when there is no occurrence id; the batch
/// processor keys those by source offset.
fn invalid_observation(verbatim: &VerbatimObservation, defects: Vec<String>) -> InvalidObservation {
    let occurrence_id = verbatim.resolved_occurrence_id();
    InvalidObservation {
        data_provider_id: verbatim.data_provider_id,
        record_key: occurrence_id.clone().unwrap_or_default(),
        native_id: verbatim.native_id.clone(),
        occurrence_id,
        dataset_id: verbatim.dataset_id.clone(),
        dataset_name: verbatim.dataset_name.clone(),
        defects,
    }
}

/// Run every mandatory-field check, collecting one defect per failure
fn validate<'a>(
    verbatim: &VerbatimObservation,
    taxa: &'a TaxonIndex,
    diagnostics: &mut TransformDiagnostics,
) -> Result<Validated<'a>, Vec<String>> {
    let mut defects = Vec::new();

    let occurrence_id = verbatim.resolved_occurrence_id();
    if occurrence_id.is_none() {
        defects.push(DEFECT_MISSING_OCCURRENCE_ID.to_string());
    }

    let point = match (verbatim.decimal_longitude, verbatim.decimal_latitude) {
        (Some(longitude), Some(latitude)) if in_range(longitude, latitude) => {
            Some(Point::new(longitude, latitude))
        }
        (Some(_), Some(_)) => {
            defects.push(DEFECT_COORDINATE_OUT_OF_RANGE.to_string());
            None
        }
        _ => {
            defects.push(DEFECT_MISSING_COORDINATE.to_string());
            None
        }
    };

    let taxon = match (verbatim.taxon_id, verbatim.scientific_name.as_deref()) {
        (Some(taxon_id), _) => match taxa.lookup(taxon_id) {
            Ok(taxon) => Some(taxon),
            Err(_) => {
                defects.push(format!("taxon not found: {}", taxon_id));
                None
            }
        },
        (None, Some(name)) if !name.trim().is_empty() => {
            match taxa.lookup_by_scientific_name(name) {
                Some(taxon) => {
                    diagnostics.taxon_resolved_by_name = true;
                    Some(taxon)
                }
                None => {
                    defects.push(format!("taxon not found: {}", name.trim()));
                    None
                }
            }
        }
        _ => {
            defects.push(DEFECT_MISSING_TAXON.to_string());
            None
        }
    };

    let event = match event_dates(verbatim.event_start_date, verbatim.event_end_date) {
        Ok(event) => Some(event),
        Err(defect) => {
            defects.push(defect.to_string());
            None
        }
    };

    match (occurrence_id, point, taxon, event) {
        (Some(occurrence_id), Some(point), Some(taxon), Some(event)) if defects.is_empty() => {
            Ok(Validated {
                occurrence_id,
                point,
                taxon,
                event,
            })
        }
        _ => Err(defects),
    }
}

fn in_range(longitude: f64, latitude: f64) -> bool {
    longitude.is_finite()
        && latitude.is_finite()
        && (-180.0..=180.0).contains(&longitude)
        && (-90.0..=90.0).contains(&latitude)
}

/// A missing end date means a single-day event
fn event_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<EventDate, &'static str> {
    let start_date = start.ok_or(DEFECT_MISSING_EVENT_DATE)?;
    let end_date = end.unwrap_or(start_date);
    if end_date < start_date {
        return Err(DEFECT_EVENT_DATES_REVERSED);
    }
    Ok(EventDate {
        start_date,
        end_date,
    })
}
