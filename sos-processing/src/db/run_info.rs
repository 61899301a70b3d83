//! Processing run metadata persistence

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use sos_common::models::{Instance, RunInfo, RunStatus};
use sos_common::{Error, Result};

use crate::store::RunInfoStore;
use crate::utils::retry_on_lock;

#[derive(Debug, Clone)]
pub struct SqliteRunInfoStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRunInfoStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub async fn load_run_info(&self, run_id: Uuid) -> Result<Option<RunInfo>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, data_provider_id, instance, status, started_at, ended_at,
                   count, invalid_count, message
            FROM processing_run_info
            WHERE run_id = ?
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(run_info_from_row).transpose()
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    // Fixed precision keeps the text column sortable
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn run_info_from_row(row: &SqliteRow) -> Result<RunInfo> {
    let run_id: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");
    let status: String = row.get("status");

    Ok(RunInfo {
        run_id,
        data_provider_id: row.get("data_provider_id"),
        instance: Instance::try_from(row.get::<i64, _>("instance"))?,
        start: parse_timestamp("started_at", &started_at)?,
        end: ended_at
            .map(|value| parse_timestamp("ended_at", &value))
            .transpose()?,
        status: status.parse::<RunStatus>()?,
        count: row.get::<i64, _>("count") as u64,
        invalid_count: row.get::<i64, _>("invalid_count") as u64,
        message: row.get("message"),
    })
}

#[async_trait]
impl RunInfoStore for SqliteRunInfoStore {
    async fn save_run_info(&self, info: &RunInfo) -> Result<()> {
        // Prepare all data BEFORE acquiring a connection
        let run_id = info.run_id.to_string();
        let instance = i64::from(info.instance.as_u8());
        let status = info.status.as_str();
        let started_at = timestamp(info.start);
        let ended_at = info.end.map(timestamp);
        let count = info.count as i64;
        let invalid_count = info.invalid_count as i64;
        let pool = &self.pool;

        retry_on_lock("save_run_info", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO processing_run_info (
                    run_id, data_provider_id, instance, status, started_at, ended_at,
                    count, invalid_count, message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(run_id) DO UPDATE SET
                    status = excluded.status,
                    ended_at = excluded.ended_at,
                    count = excluded.count,
                    invalid_count = excluded.invalid_count,
                    message = excluded.message
                "#,
            )
            .bind(&run_id)
            .bind(info.data_provider_id)
            .bind(instance)
            .bind(status)
            .bind(&started_at)
            .bind(&ended_at)
            .bind(count)
            .bind(invalid_count)
            .bind(&info.message)
            .execute(pool)
            .await?;

            Ok(())
        })
        .await
    }

    async fn latest_run_infos(&self, instance: Option<Instance>) -> Result<Vec<RunInfo>> {
        let instance = instance.map(|instance| i64::from(instance.as_u8()));

        let rows = sqlx::query(
            r#"
            SELECT run_id, data_provider_id, instance, status, started_at, ended_at,
                   count, invalid_count, message
            FROM processing_run_info
            WHERE ? IS NULL OR instance = ?
            ORDER BY data_provider_id, started_at DESC, rowid DESC
            "#,
        )
        .bind(instance)
        .bind(instance)
        .fetch_all(&self.pool)
        .await?;

        let mut seen = HashSet::new();
        let mut latest = Vec::new();
        for row in &rows {
            let info = run_info_from_row(row)?;
            if seen.insert(info.data_provider_id) {
                latest.push(info);
            }
        }
        Ok(latest)
    }
}
