//! Counter documents: global per-entity, per-user interest, per-creator.
//!
//! Increments are commutative upserts so concurrent engagements never need
//! coordination; ordering across them is not observable.

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EntityType, StatCounters};

pub struct StatsRepo {
    pool: PgPool,
}

impl StatsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn bump_global(
        &self,
        entity_type: EntityType,
        name: &str,
        impressions: i64,
        engagement: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO global_stats (entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_type, name) DO UPDATE
            SET impression_count = global_stats.impression_count + EXCLUDED.impression_count,
                total_engagement = global_stats.total_engagement + EXCLUDED.total_engagement
            "#,
        )
        .bind(entity_type.as_str())
        .bind(name)
        .bind(impressions)
        .bind(engagement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bump_user_interest(
        &self,
        user_id: Uuid,
        entity_type: EntityType,
        name: &str,
        impressions: i64,
        engagement: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_interest_stats (user_id, entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, entity_type, name) DO UPDATE
            SET impression_count = user_interest_stats.impression_count + EXCLUDED.impression_count,
                total_engagement = user_interest_stats.total_engagement + EXCLUDED.total_engagement
            "#,
        )
        .bind(user_id)
        .bind(entity_type.as_str())
        .bind(name)
        .bind(impressions)
        .bind(engagement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bump_creator(
        &self,
        creator_id: Uuid,
        impressions: i64,
        engagement: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO creator_stats (creator_id, impression_count, total_engagement)
            VALUES ($1, $2, $3)
            ON CONFLICT (creator_id) DO UPDATE
            SET impression_count = creator_stats.impression_count + EXCLUDED.impression_count,
                total_engagement = creator_stats.total_engagement + EXCLUDED.total_engagement
            "#,
        )
        .bind(creator_id)
        .bind(impressions)
        .bind(engagement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Init-only upsert; the counters are incremented by the stats consumer.
    pub async fn ensure_global(&self, entity_type: EntityType, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO global_stats (entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (entity_type, name) DO NOTHING
            "#,
        )
        .bind(entity_type.as_str())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ensure_creator(&self, creator_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO creator_stats (creator_id, impression_count, total_engagement)
            VALUES ($1, 0, 0)
            ON CONFLICT (creator_id) DO NOTHING
            "#,
        )
        .bind(creator_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn global(&self, entity_type: EntityType, name: &str) -> Result<StatCounters> {
        let row = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT impression_count, total_engagement
            FROM global_stats
            WHERE entity_type = $1 AND name = $2
            "#,
        )
        .bind(entity_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(to_counters(row))
    }

    pub async fn user_interest(
        &self,
        user_id: Uuid,
        entity_type: EntityType,
        name: &str,
    ) -> Result<StatCounters> {
        let row = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT impression_count, total_engagement
            FROM user_interest_stats
            WHERE user_id = $1 AND entity_type = $2 AND name = $3
            "#,
        )
        .bind(user_id)
        .bind(entity_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(to_counters(row))
    }

    pub async fn creator(&self, creator_id: Uuid) -> Result<Option<StatCounters>> {
        let row = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT impression_count, total_engagement
            FROM creator_stats
            WHERE creator_id = $1
            "#,
        )
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(impressions, engagement)| StatCounters {
            impression_count: impressions,
            total_engagement: engagement,
        }))
    }

    /// Batch lookup for feed scoring.
    pub async fn globals_by_name(
        &self,
        entity_type: EntityType,
        names: &[String],
    ) -> Result<HashMap<String, StatCounters>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (String, i64, f64)>(
            r#"
            SELECT name, impression_count, total_engagement
            FROM global_stats
            WHERE entity_type = $1 AND name = ANY($2)
            "#,
        )
        .bind(entity_type.as_str())
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, impressions, engagement)| {
                (
                    name,
                    StatCounters {
                        impression_count: impressions,
                        total_engagement: engagement,
                    },
                )
            })
            .collect())
    }

    pub async fn creators_by_id(
        &self,
        creator_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, StatCounters>> {
        if creator_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, i64, f64)>(
            r#"
            SELECT creator_id, impression_count, total_engagement
            FROM creator_stats
            WHERE creator_id = ANY($1)
            "#,
        )
        .bind(creator_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, impressions, engagement)| {
                (
                    id,
                    StatCounters {
                        impression_count: impressions,
                        total_engagement: engagement,
                    },
                )
            })
            .collect())
    }
}

fn to_counters(row: Option<(i64, f64)>) -> StatCounters {
    row.map(|(impressions, engagement)| StatCounters {
        impression_count: impressions,
        total_engagement: engagement,
    })
    .unwrap_or_default()
}
