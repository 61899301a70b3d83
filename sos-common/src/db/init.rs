//! Database initialization
//!
//! Creates the pipeline schema idempotently: reference data (taxa, areas,
//! diffusion rules, providers), verbatim input, one pair of observation
//! tables per storage generation, run metadata and the single-row
//! instance state.

use crate::models::Instance;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// SQLite's own wait on a locked database; longer waits are handled by the
/// writers' retry backoff
pub const BUSY_TIMEOUT_MS: u64 = 250;

/// Open (or create) the database file and make sure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets readers of the active generation proceed while a run writes
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Every connection to `sqlite::memory:` is a separate database, so the
/// pool is pinned to one connection that never expires.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_reference_tables(pool).await?;
    create_verbatim_tables(pool).await?;
    for instance in [Instance::Zero, Instance::One] {
        create_generation_tables(pool, instance).await?;
    }
    create_run_info_table(pool).await?;
    create_instance_state_table(pool).await?;
    Ok(())
}

async fn create_reference_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_providers (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxa (
            id INTEGER PRIMARY KEY,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS areas (
            id INTEGER PRIMARY KEY,
            area_type TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS diffusion_rules (
            id INTEGER PRIMARY KEY,
            taxon_id INTEGER NOT NULL,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_diffusion_rules_taxon ON diffusion_rules(taxon_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_verbatim_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verbatim_observations (
            data_provider_id INTEGER NOT NULL,
            row_id INTEGER NOT NULL,
            document TEXT NOT NULL,
            PRIMARY KEY (data_provider_id, row_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_info (
            data_provider_id INTEGER PRIMARY KEY,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Observation tables of one storage generation
async fn create_generation_tables(pool: &SqlitePool, instance: Instance) -> Result<()> {
    let processed = format!(
        r#"
        CREATE TABLE IF NOT EXISTS processed_observations_{} (
            data_provider_id INTEGER NOT NULL,
            occurrence_id TEXT NOT NULL,
            document TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (data_provider_id, occurrence_id)
        )
        "#,
        instance.suffix()
    );
    sqlx::query(&processed).execute(pool).await?;

    let invalid = format!(
        r#"
        CREATE TABLE IF NOT EXISTS invalid_observations_{} (
            data_provider_id INTEGER NOT NULL,
            record_key TEXT NOT NULL,
            document TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (data_provider_id, record_key)
        )
        "#,
        instance.suffix()
    );
    sqlx::query(&invalid).execute(pool).await?;

    Ok(())
}

async fn create_run_info_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_run_info (
            run_id TEXT PRIMARY KEY,
            data_provider_id INTEGER NOT NULL,
            instance INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            count INTEGER NOT NULL DEFAULT 0,
            invalid_count INTEGER NOT NULL DEFAULT 0,
            message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Single-row table holding the active generation
async fn create_instance_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instance_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            active_instance INTEGER NOT NULL CHECK (active_instance IN (0, 1)),
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO instance_state (id, active_instance, updated_at) VALUES (1, 0, ?)",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
