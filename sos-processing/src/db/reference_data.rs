//! Reference data: taxa, areas, diffusion rules and data providers
//!
//! Loaded once at run start and turned into the immutable, shared
//! structures the transformer works against.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use sos_common::models::{Area, DataProvider, DiffusionRule, Taxon};
use sos_common::Result;

use crate::area_resolver::AreaSnapshot;
use crate::diffusion::{DiffusionRuleEngine, PrecisionPolicy, RuleSet};
use crate::error::ProcessingResult;
use crate::services::TransformContext;
use crate::taxon_index::TaxonIndex;

pub async fn save_taxa(pool: &SqlitePool, taxa: &[Taxon]) -> Result<()> {
    let documents = taxa
        .iter()
        .map(|taxon| -> Result<(i32, String)> { Ok((taxon.id, serde_json::to_string(taxon)?)) })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = pool.begin().await?;
    for (id, document) in &documents {
        sqlx::query(
            "INSERT INTO taxa (id, document) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document",
        )
        .bind(id)
        .bind(document)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn load_taxa(pool: &SqlitePool) -> Result<Vec<Taxon>> {
    let documents: Vec<String> = sqlx::query_scalar("SELECT document FROM taxa ORDER BY id")
        .fetch_all(pool)
        .await?;

    documents
        .iter()
        .map(|document| -> Result<Taxon> { Ok(serde_json::from_str(document)?) })
        .collect()
}

pub async fn save_areas(pool: &SqlitePool, areas: &[Area]) -> Result<()> {
    let documents = areas
        .iter()
        .map(|area| -> Result<(&Area, String)> { Ok((area, serde_json::to_string(area)?)) })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = pool.begin().await?;
    for (area, document) in &documents {
        sqlx::query(
            r#"
            INSERT INTO areas (id, area_type, feature_id, document) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                area_type = excluded.area_type,
                feature_id = excluded.feature_id,
                document = excluded.document
            "#,
        )
        .bind(area.id)
        .bind(area.area_type.as_str())
        .bind(&area.feature_id)
        .bind(document)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Areas in ascending id order
pub async fn load_areas(pool: &SqlitePool) -> Result<Vec<Area>> {
    let documents: Vec<String> = sqlx::query_scalar("SELECT document FROM areas ORDER BY id")
        .fetch_all(pool)
        .await?;

    documents
        .iter()
        .map(|document| -> Result<Area> { Ok(serde_json::from_str(document)?) })
        .collect()
}

pub async fn save_diffusion_rules(pool: &SqlitePool, rules: &[DiffusionRule]) -> Result<()> {
    let documents = rules
        .iter()
        .map(|rule| -> Result<(&DiffusionRule, String)> { Ok((rule, serde_json::to_string(rule)?)) })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = pool.begin().await?;
    for (rule, document) in &documents {
        sqlx::query(
            r#"
            INSERT INTO diffusion_rules (id, taxon_id, document) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                taxon_id = excluded.taxon_id,
                document = excluded.document
            "#,
        )
        .bind(rule.id)
        .bind(rule.taxon_id)
        .bind(document)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load all diffusion rules into a [`RuleSet`]
///
/// A rule document that does not decode marks its taxon as unreadable so
/// that observations of that taxon are diffused fail-safe.
pub async fn load_rule_set(pool: &SqlitePool) -> Result<RuleSet> {
    let rows = sqlx::query("SELECT id, taxon_id, document FROM diffusion_rules ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut rules = RuleSet::default();
    for row in &rows {
        let id: i32 = row.get("id");
        let taxon_id: i32 = row.get("taxon_id");
        let document: String = row.get("document");

        match serde_json::from_str::<DiffusionRule>(&document) {
            Ok(rule) => {
                if rule.precision_meters == Some(0) {
                    tracing::warn!(rule_id = id, taxon_id, "Rule precision is zero, default applies");
                }
                rules.insert(rule);
            }
            Err(e) => {
                tracing::warn!(rule_id = id, taxon_id, error = %e, "Undecodable diffusion rule");
                rules.mark_unreadable(taxon_id, format!("rule {}: {}", id, e));
            }
        }
    }

    tracing::info!(
        rules = rules.rule_count(),
        unreadable_taxa = rules.unreadable_count(),
        "Diffusion rules loaded"
    );
    Ok(rules)
}

pub async fn save_data_providers(pool: &SqlitePool, providers: &[DataProvider]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for provider in providers {
        sqlx::query(
            r#"
            INSERT INTO data_providers (id, identifier, name) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                identifier = excluded.identifier,
                name = excluded.name
            "#,
        )
        .bind(provider.id)
        .bind(&provider.identifier)
        .bind(&provider.name)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn load_data_providers(pool: &SqlitePool) -> Result<Vec<DataProvider>> {
    let rows = sqlx::query("SELECT id, identifier, name FROM data_providers ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| DataProvider {
            id: row.get("id"),
            identifier: row.get("identifier"),
            name: row.get("name"),
        })
        .collect())
}

/// Build the shared, read-only enrichment context for one run
pub async fn load_transform_context(
    pool: &SqlitePool,
    reference_date: NaiveDate,
    policy: PrecisionPolicy,
) -> ProcessingResult<TransformContext> {
    let taxa = TaxonIndex::build(load_taxa(pool).await?)?;
    let areas = AreaSnapshot::load(load_areas(pool).await?);
    let rules = load_rule_set(pool).await?;

    Ok(TransformContext {
        taxa: Arc::new(taxa),
        areas: Arc::new(areas),
        rules: Arc::new(DiffusionRuleEngine::new(Arc::new(rules), reference_date, policy)),
    })
}
