//! Active generation indicator
//!
//! A single row (`id = 1`) in `instance_state`. Activation is one
//! conditional UPDATE, so readers observe either the old or the new value
//! and never anything in between.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use sos_common::models::Instance;
use sos_common::{Error, Result};

use crate::store::InstanceStateStore;

#[derive(Debug, Clone)]
pub struct SqliteInstanceStateStore {
    pool: SqlitePool,
}

impl SqliteInstanceStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceStateStore for SqliteInstanceStateStore {
    async fn active_instance(&self) -> Result<Instance> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT active_instance FROM instance_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        let value = value.ok_or_else(|| Error::NotFound("instance state row".to_string()))?;
        Instance::try_from(value)
    }

    async fn compare_and_set(&self, expected: Instance, target: Instance) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instance_state
            SET active_instance = ?, updated_at = ?
            WHERE id = 1 AND active_instance = ?
            "#,
        )
        .bind(i64::from(target.as_u8()))
        .bind(Utc::now().to_rfc3339())
        .bind(i64::from(expected.as_u8()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set(&self, instance: Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_state (id, active_instance, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                active_instance = excluded.active_instance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(i64::from(instance.as_u8()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::db::init_memory_database;

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = SqliteInstanceStateStore::new(init_memory_database().await.unwrap());
        assert_eq!(store.active_instance().await.unwrap(), Instance::Zero);

        assert!(!store.compare_and_set(Instance::One, Instance::Zero).await.unwrap());
        assert!(store.compare_and_set(Instance::Zero, Instance::One).await.unwrap());
        assert_eq!(store.active_instance().await.unwrap(), Instance::One);

        // Second attempt from the same observed value does nothing
        assert!(!store.compare_and_set(Instance::Zero, Instance::One).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overrides() {
        let store = SqliteInstanceStateStore::new(init_memory_database().await.unwrap());
        store.set(Instance::One).await.unwrap();
        assert_eq!(store.active_instance().await.unwrap(), Instance::One);
        store.set(Instance::One).await.unwrap();
        assert_eq!(store.active_instance().await.unwrap(), Instance::One);
    }
}
