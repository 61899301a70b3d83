//! Verbatim observation and harvest metadata persistence
//!
//! Harvesters own these tables; the pipeline only reads them. The insert
//! helpers exist for loading fixtures and for harvester adapters living in
//! the same process.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use sos_common::models::{HarvestInfo, VerbatimObservation};
use sos_common::Result;

use crate::store::VerbatimSource;

/// Append verbatim records, numbering rows after the provider's last row
pub async fn insert_verbatim(pool: &SqlitePool, observations: &[VerbatimObservation]) -> Result<u64> {
    // Prepare all documents before acquiring the connection
    let documents = observations
        .iter()
        .map(|observation| -> Result<(i32, String)> {
            Ok((observation.data_provider_id, serde_json::to_string(observation)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = pool.begin().await?;
    for (data_provider_id, document) in &documents {
        sqlx::query(
            r#"
            INSERT INTO verbatim_observations (data_provider_id, row_id, document)
            VALUES (
                ?,
                (SELECT COALESCE(MAX(row_id), -1) + 1 FROM verbatim_observations WHERE data_provider_id = ?),
                ?
            )
            "#,
        )
        .bind(data_provider_id)
        .bind(data_provider_id)
        .bind(document)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(documents.len() as u64)
}

pub async fn save_harvest_info(pool: &SqlitePool, info: &HarvestInfo) -> Result<()> {
    let document = serde_json::to_string(info)?;

    sqlx::query(
        r#"
        INSERT INTO harvest_info (data_provider_id, document) VALUES (?, ?)
        ON CONFLICT(data_provider_id) DO UPDATE SET document = excluded.document
        "#,
    )
    .bind(info.data_provider_id)
    .bind(&document)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_harvest_info(pool: &SqlitePool, data_provider_id: i32) -> Result<Option<HarvestInfo>> {
    let document: Option<String> =
        sqlx::query_scalar("SELECT document FROM harvest_info WHERE data_provider_id = ?")
            .bind(data_provider_id)
            .fetch_optional(pool)
            .await?;

    Ok(document
        .map(|document| serde_json::from_str(&document))
        .transpose()?)
}

/// Verbatim records of one provider, read in row order
#[derive(Debug, Clone)]
pub struct SqliteVerbatimSource {
    pool: SqlitePool,
    data_provider_id: i32,
}

impl SqliteVerbatimSource {
    pub fn new(pool: SqlitePool, data_provider_id: i32) -> Self {
        Self {
            pool,
            data_provider_id,
        }
    }
}

#[async_trait]
impl VerbatimSource for SqliteVerbatimSource {
    fn data_provider_id(&self) -> i32 {
        self.data_provider_id
    }

    async fn harvest_info(&self) -> Result<Option<HarvestInfo>> {
        load_harvest_info(&self.pool, self.data_provider_id).await
    }

    async fn get_chunk(&self, start_offset: u64, max_rows: usize) -> Result<Vec<VerbatimObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM verbatim_observations
            WHERE data_provider_id = ?
            ORDER BY row_id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(self.data_provider_id)
        .bind(max_rows as i64)
        .bind(start_offset as i64)
        .fetch_all(&self.pool)
        .await?;

        // An undecodable verbatim document is a source error, not a record defect
        rows.iter()
            .map(|row| -> Result<VerbatimObservation> {
                let document: String = row.get("document");
                Ok(serde_json::from_str(&document)?)
            })
            .collect()
    }
}
