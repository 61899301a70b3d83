//! # SOS Common Library
//!
//! Shared code for the species observation processing workspace:
//! - Observation, taxon, area and diffusion rule models
//! - Event types (ProcessingEvent) and EventBus
//! - Bootstrap configuration loading
//! - SQLite schema initialization

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
