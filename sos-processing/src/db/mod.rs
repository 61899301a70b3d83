//! SQLite implementations of the pipeline stores

pub mod instance_state;
pub mod observations;
pub mod reference_data;
pub mod run_info;
pub mod verbatim;

pub use instance_state::SqliteInstanceStateStore;
pub use observations::SqliteObservationStore;
pub use reference_data::load_transform_context;
pub use run_info::SqliteRunInfoStore;
pub use verbatim::SqliteVerbatimSource;
