//! Generation-specific observation collections
//!
//! Processed and invalid observations are stored as JSON documents in
//! `{collection}_{instance}` tables. Writers only ever target the inactive
//! generation; readers pick the generation they were told is active.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use sos_common::models::Instance;
use sos_common::Result;

use crate::store::{collection_table, BulkWriter, GenerationDocument, Reader};
use crate::utils::retry_on_lock;

#[derive(Debug, Clone)]
pub struct SqliteObservationStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteObservationStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }
}

#[async_trait]
impl<T: GenerationDocument> BulkWriter<T> for SqliteObservationStore {
    async fn clear_provider(&self, instance: Instance, data_provider_id: i32) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE data_provider_id = ?",
            collection_table::<T>(instance)
        );
        let pool = &self.pool;

        retry_on_lock("clear_provider", self.max_lock_wait_ms, || async {
            let result = sqlx::query(&sql)
                .bind(data_provider_id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn bulk_upsert(&self, instance: Instance, documents: &[T]) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        // Prepare all data BEFORE acquiring a connection
        let rows = documents
            .iter()
            .map(|document| -> Result<(i32, String, String)> {
                Ok((
                    document.data_provider_id(),
                    document.document_key().to_string(),
                    serde_json::to_string(document)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let processed_at = Utc::now().to_rfc3339();
        let sql = format!(
            r#"
            INSERT INTO {table} (data_provider_id, {key}, document, processed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(data_provider_id, {key}) DO UPDATE SET
                document = excluded.document,
                processed_at = excluded.processed_at
            "#,
            table = collection_table::<T>(instance),
            key = T::KEY_COLUMN,
        );
        let pool = &self.pool;

        retry_on_lock("bulk_upsert", self.max_lock_wait_ms, || async {
            let mut tx = pool.begin().await?;
            for (data_provider_id, key, document) in &rows {
                sqlx::query(&sql)
                    .bind(data_provider_id)
                    .bind(key)
                    .bind(document)
                    .bind(&processed_at)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(rows.len() as u64)
        })
        .await
    }
}

#[async_trait]
impl<T: GenerationDocument> Reader<T> for SqliteObservationStore {
    async fn get(&self, instance: Instance, data_provider_id: i32, key: &str) -> Result<Option<T>> {
        let sql = format!(
            "SELECT document FROM {} WHERE data_provider_id = ? AND {} = ?",
            collection_table::<T>(instance),
            T::KEY_COLUMN
        );

        let document: Option<String> = sqlx::query_scalar(&sql)
            .bind(data_provider_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document
            .map(|document| serde_json::from_str(&document))
            .transpose()?)
    }

    async fn count(&self, instance: Instance, data_provider_id: Option<i32>) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ? IS NULL OR data_provider_id = ?",
            collection_table::<T>(instance)
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(data_provider_id)
            .bind(data_provider_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
