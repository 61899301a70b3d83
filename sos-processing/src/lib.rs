//! sos-processing library interface
//!
//! Observation processing pipeline: canonical transformation of verbatim
//! records, taxonomic and geographic enrichment, diffusion of sensitive
//! coordinates, and publication into the inactive storage generation
//! followed by an atomic activation.

pub mod area_resolver;
pub mod cache;
pub mod db;
pub mod diffusion;
pub mod error;
pub mod services;
pub mod store;
pub mod taxon_index;
pub mod utils;

pub use crate::error::{ProcessingError, ProcessingResult};
pub use crate::services::{
    BatchProcessor, InstancePublisher, ProcessingJob, TransformContext,
};
