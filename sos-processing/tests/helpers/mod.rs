//! Shared fixtures for the pipeline integration tests
//!
//! Every test gets its own in-memory database seeded with a small
//! classification (Biota > Canis > Canis lupus, Vulpes vulpes), one county
//! around Stockholm, and two providers.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use sos_common::config::ProcessingConfig;
use sos_common::db::init_memory_database;
use sos_common::events::EventBus;
use sos_common::models::{
    Area, AreaType, DataProvider, DiffusionRule, Geometry, HarvestInfo, Instance, Point, Polygon,
    RunStatus, Taxon, TaxonAttributes, VerbatimObservation,
};
use sos_common::Error;
use sos_processing::db::reference_data::{
    save_areas, save_data_providers, save_diffusion_rules, save_taxa,
};
use sos_processing::db::verbatim::{insert_verbatim, save_harvest_info};
use sos_processing::db::{
    load_transform_context, SqliteInstanceStateStore, SqliteObservationStore, SqliteRunInfoStore,
    SqliteVerbatimSource,
};
use sos_processing::diffusion::PrecisionPolicy;
use sos_processing::store::{InstanceStateStore, VerbatimSource};
use sos_processing::{BatchProcessor, InstancePublisher, ProcessingJob};

pub const WOLF: i32 = 100024;
pub const FOX: i32 = 200000;
pub const ARTPORTALEN: i32 = 1;
pub const NORS: i32 = 2;

pub struct TestEnv {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub observations: Arc<SqliteObservationStore>,
    pub run_info_store: Arc<SqliteRunInfoStore>,
    pub instance_store: Arc<SqliteInstanceStateStore>,
    pub publisher: Arc<InstancePublisher>,
    pub job: ProcessingJob,
}

impl TestEnv {
    pub fn sources(&self, provider_ids: &[i32]) -> Vec<Arc<dyn VerbatimSource>> {
        provider_ids
            .iter()
            .map(|id| {
                Arc::new(SqliteVerbatimSource::new(self.pool.clone(), *id)) as Arc<dyn VerbatimSource>
            })
            .collect()
    }
}

/// Small chunks and slices so a handful of records spans several of each
pub fn test_config() -> ProcessingConfig {
    ProcessingConfig {
        chunk_size: 2,
        worker_count: 2,
        worker_slice_size: 1,
        max_lock_wait_ms: 1_000,
        ..Default::default()
    }
}

pub async fn setup() -> TestEnv {
    setup_with_rules(vec![wolf_rule()]).await
}

pub async fn setup_with_rules(rules: Vec<DiffusionRule>) -> TestEnv {
    let pool = init_memory_database().await.unwrap();
    seed_reference_data(&pool, &rules).await;

    let config = test_config();
    let context = load_transform_context(
        &pool,
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        PrecisionPolicy::from(&config),
    )
    .await
    .unwrap();

    let event_bus = EventBus::new(1000);
    let observations = Arc::new(SqliteObservationStore::new(pool.clone(), config.max_lock_wait_ms));
    let run_info_store = Arc::new(SqliteRunInfoStore::new(pool.clone(), config.max_lock_wait_ms));
    let instance_store = Arc::new(SqliteInstanceStateStore::new(pool.clone()));

    let publisher = Arc::new(InstancePublisher::new(
        instance_store.clone(),
        run_info_store.clone(),
        event_bus.clone(),
    ));
    let processor = Arc::new(BatchProcessor::new(
        context,
        observations.clone(),
        observations.clone(),
        run_info_store.clone(),
        config,
        event_bus.clone(),
    ));
    let job = ProcessingJob::new(processor, publisher.clone(), event_bus.clone());

    TestEnv {
        pool,
        event_bus,
        observations,
        run_info_store,
        instance_store,
        publisher,
        job,
    }
}

fn taxon(id: i32, name: &str, parent_id: Option<i32>) -> Taxon {
    Taxon {
        id,
        scientific_name: name.to_string(),
        vernacular_name: None,
        parent_id,
        secondary_parent_ids: BTreeSet::new(),
        attributes: TaxonAttributes::default(),
    }
}

async fn seed_reference_data(pool: &SqlitePool, rules: &[DiffusionRule]) {
    let mut canis = taxon(3, "Canis", Some(0));
    canis.attributes.protection_level = Some(3);
    let mut wolf = taxon(WOLF, "Canis lupus", Some(3));
    wolf.vernacular_name = Some("varg".to_string());

    save_taxa(
        pool,
        &[
            taxon(0, "Biota", None),
            canis,
            wolf,
            taxon(FOX, "Vulpes vulpes", Some(0)),
        ],
    )
    .await
    .unwrap();

    save_areas(
        pool,
        &[Area {
            id: 1,
            area_type: AreaType::County,
            feature_id: "01".to_string(),
            name: "Stockholm".to_string(),
            geometry: Geometry::Polygon(Polygon::new(vec![
                Point::new(17.0, 58.5),
                Point::new(19.5, 58.5),
                Point::new(19.5, 60.5),
                Point::new(17.0, 60.5),
            ])),
        }],
    )
    .await
    .unwrap();

    save_diffusion_rules(pool, rules).await.unwrap();

    save_data_providers(
        pool,
        &[
            DataProvider {
                id: ARTPORTALEN,
                identifier: "Artportalen".to_string(),
                name: "Artportalen".to_string(),
            },
            DataProvider {
                id: NORS,
                identifier: "NORS".to_string(),
                name: "Swedish National Register of Survey test-fishing".to_string(),
            },
        ],
    )
    .await
    .unwrap();
}

/// Unscoped, non-expiring rule generalizing wolves to 5 km
pub fn wolf_rule() -> DiffusionRule {
    DiffusionRule {
        id: 1,
        taxon_id: WOLF,
        areas: vec![],
        activity_ids: vec![],
        stage_ids: vec![],
        window: None,
        expire_date: None,
        precision_meters: Some(5000),
    }
}

pub fn occurrence_id(native_id: &str) -> String {
    format!("urn:lsid:test:sighting:{}", native_id)
}

/// Valid record in central Stockholm
pub fn verbatim(data_provider_id: i32, native_id: &str, taxon_id: i32) -> VerbatimObservation {
    VerbatimObservation {
        data_provider_id,
        native_id: native_id.to_string(),
        occurrence_id: Some(occurrence_id(native_id)),
        dataset_id: Some("ds-1".to_string()),
        dataset_name: Some("Test dataset".to_string()),
        decimal_latitude: Some(59.3293),
        decimal_longitude: Some(18.0686),
        coordinate_uncertainty_in_meters: Some(25),
        event_start_date: NaiveDate::from_ymd_opt(2024, 3, 14),
        taxon_id: Some(taxon_id),
        ..Default::default()
    }
}

/// Store verbatim records and a harvest run with the given status
pub async fn seed_provider(
    pool: &SqlitePool,
    data_provider_id: i32,
    records: &[VerbatimObservation],
    harvest_status: RunStatus,
) {
    insert_verbatim(pool, records).await.unwrap();
    save_harvest_info(
        pool,
        &HarvestInfo {
            data_provider_id,
            start: Utc::now(),
            end: Some(Utc::now()),
            status: harvest_status,
            count: records.len() as u64,
        },
    )
    .await
    .unwrap();
}

/// Verbatim source whose reads fail from `fail_from_offset` on
pub struct FailingSource {
    inner: SqliteVerbatimSource,
    fail_from_offset: u64,
}

impl FailingSource {
    pub fn new(pool: SqlitePool, data_provider_id: i32, fail_from_offset: u64) -> Self {
        Self {
            inner: SqliteVerbatimSource::new(pool, data_provider_id),
            fail_from_offset,
        }
    }
}

#[async_trait]
impl VerbatimSource for FailingSource {
    fn data_provider_id(&self) -> i32 {
        self.inner.data_provider_id()
    }

    async fn harvest_info(&self) -> sos_common::Result<Option<HarvestInfo>> {
        self.inner.harvest_info().await
    }

    async fn get_chunk(
        &self,
        start_offset: u64,
        max_rows: usize,
    ) -> sos_common::Result<Vec<VerbatimObservation>> {
        if start_offset >= self.fail_from_offset {
            return Err(Error::Internal(format!(
                "verbatim store unreachable at offset {}",
                start_offset
            )));
        }
        self.inner.get_chunk(start_offset, max_rows).await
    }
}

/// Instance state whose next `failures` compare-and-set calls fail
pub struct FlakyInstanceStore {
    inner: Arc<SqliteInstanceStateStore>,
    failures_left: AtomicUsize,
}

impl FlakyInstanceStore {
    pub fn new(inner: Arc<SqliteInstanceStateStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl InstanceStateStore for FlakyInstanceStore {
    async fn active_instance(&self) -> sos_common::Result<Instance> {
        self.inner.active_instance().await
    }

    async fn compare_and_set(&self, expected: Instance, target: Instance) -> sos_common::Result<bool> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Internal("instance state unavailable".to_string()));
        }
        self.inner.compare_and_set(expected, target).await
    }

    async fn set(&self, instance: Instance) -> sos_common::Result<()> {
        self.inner.set(instance).await
    }
}
