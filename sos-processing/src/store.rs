//! Storage seams of the pipeline
//!
//! Small composed traits instead of one repository per entity: the batch
//! processor only needs a verbatim source and bulk writers, the publisher
//! only needs the instance indicator and run metadata. SQLite
//! implementations live in [`crate::db`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use sos_common::models::{
    HarvestInfo, Instance, InvalidObservation, ProcessedObservation, RunInfo, VerbatimObservation,
};
use sos_common::Result;

/// Already-deserialized verbatim records of one provider
#[async_trait]
pub trait VerbatimSource: Send + Sync {
    fn data_provider_id(&self) -> i32;

    /// Latest harvest metadata, `None` if the provider was never harvested
    async fn harvest_info(&self) -> Result<Option<HarvestInfo>>;

    /// Up to `max_rows` records starting at `start_offset`, in stable order;
    /// an empty chunk marks the end
    async fn get_chunk(&self, start_offset: u64, max_rows: usize)
        -> Result<Vec<VerbatimObservation>>;
}

/// Record stored in a generation-specific collection
///
/// Documents are keyed by `(data_provider_id, document_key)`; writing a
/// document with an existing key replaces it.
pub trait GenerationDocument: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name; the table is `{COLLECTION}_{instance}`
    const COLLECTION: &'static str;
    const KEY_COLUMN: &'static str;

    fn data_provider_id(&self) -> i32;
    fn document_key(&self) -> &str;
}

impl GenerationDocument for ProcessedObservation {
    const COLLECTION: &'static str = "processed_observations";
    const KEY_COLUMN: &'static str = "occurrence_id";

    fn data_provider_id(&self) -> i32 {
        self.data_provider_id
    }

    fn document_key(&self) -> &str {
        &self.occurrence_id
    }
}

impl GenerationDocument for InvalidObservation {
    const COLLECTION: &'static str = "invalid_observations";
    const KEY_COLUMN: &'static str = "record_key";

    fn data_provider_id(&self) -> i32 {
        self.data_provider_id
    }

    fn document_key(&self) -> &str {
        &self.record_key
    }
}

/// Table holding `T` in the given generation
pub fn collection_table<T: GenerationDocument>(instance: Instance) -> String {
    format!("{}_{}", T::COLLECTION, instance.suffix())
}

#[async_trait]
pub trait BulkWriter<T: GenerationDocument>: Send + Sync {
    /// Remove every document of a provider from a generation
    async fn clear_provider(&self, instance: Instance, data_provider_id: i32) -> Result<u64>;

    /// Insert or replace documents, returning the number written
    async fn bulk_upsert(&self, instance: Instance, documents: &[T]) -> Result<u64>;
}

#[async_trait]
pub trait Reader<T: GenerationDocument>: Send + Sync {
    async fn get(&self, instance: Instance, data_provider_id: i32, key: &str)
        -> Result<Option<T>>;

    /// Documents in a generation, optionally restricted to one provider
    async fn count(&self, instance: Instance, data_provider_id: Option<i32>) -> Result<u64>;
}

/// The persisted active-generation indicator
#[async_trait]
pub trait InstanceStateStore: Send + Sync {
    async fn active_instance(&self) -> Result<Instance>;

    /// Set the indicator to `target` only if it currently holds `expected`;
    /// returns whether the write happened
    async fn compare_and_set(&self, expected: Instance, target: Instance) -> Result<bool>;

    /// Unconditional write
    async fn set(&self, instance: Instance) -> Result<()>;
}

#[async_trait]
pub trait RunInfoStore: Send + Sync {
    async fn save_run_info(&self, info: &RunInfo) -> Result<()>;

    /// Most recent run per provider, optionally restricted to runs that
    /// wrote to `instance`
    async fn latest_run_infos(&self, instance: Option<Instance>) -> Result<Vec<RunInfo>>;
}
