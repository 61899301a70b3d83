//! Data model shared by the processing pipeline and its stores

pub mod area;
pub mod diffusion;
pub mod instance;
pub mod observation;
pub mod provider;
pub mod run_info;
pub mod taxon;

pub use area::{Area, AreaRef, AreaType, Geometry, Point, Polygon};
pub use diffusion::{DiffusionRule, DiffusionStatus, MonthDay, RecurringWindow, RuleArea};
pub use instance::Instance;
pub use observation::{
    Dataset, EventDate, InvalidObservation, Location, ProcessedObservation, TaxonSnapshot,
    ValidationStatus, VerbatimObservation,
};
pub use provider::{DataProvider, ProviderScope};
pub use run_info::{HarvestInfo, RunInfo, RunStatus};
pub use taxon::{Taxon, TaxonAttributes};
