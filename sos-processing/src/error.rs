//! Error types for sos-processing
//!
//! Per-record problems never show up here: they become
//! `InvalidObservation`s or warnings. These errors abort a provider run
//! (source and store failures) or an activation.

use thiserror::Error;

use crate::services::instance_publisher::ActivationError;
use crate::taxon_index::TaxonIndexError;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Verbatim source could not be read
    #[error("Verbatim source error: {0}")]
    Source(String),

    /// Taxonomy could not be indexed
    #[error("Taxonomy error: {0}")]
    Taxonomy(#[from] TaxonIndexError),

    /// Activation of a generation failed
    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    /// A transformation worker panicked or was aborted
    #[error("Worker task failed: {0}")]
    Worker(String),

    /// Store or configuration error from sos-common
    #[error("Common error: {0}")]
    Common(#[from] sos_common::Error),
}

/// Result type for processing operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;
