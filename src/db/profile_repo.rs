//! Persistent user profile storage.
//!
//! Pool trees live as JSONB columns on the `users` row; the seen-post set is
//! a side table so feed filtering stays an indexed lookup instead of a blob
//! rewrite.

use sqlx::PgPool;
use std::collections::HashSet;
use tracing::error;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CreatorsInterests, ProfileState, UserProfile};

pub struct ProfileRepo {
    pool: PgPool,
}

impl ProfileRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<
            _,
            (
                String,            // user_name
                String,            // email
                serde_json::Value, // top_interests
                serde_json::Value, // rising_interests
                serde_json::Value, // creators_interests
                serde_json::Value, // following
            ),
        >(
            r#"
            SELECT user_name, email, top_interests, rising_interests,
                   creators_interests, following
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load user profile {}: {}", user_id, e);
            AppError::Database(e)
        })?;

        let Some((user_name, email, top, rising, creators, following)) = row else {
            return Ok(None);
        };

        let state = ProfileState {
            top_interests: serde_json::from_value(top)?,
            rising_interests: serde_json::from_value(rising)?,
            creators: serde_json::from_value::<Option<CreatorsInterests>>(creators)?
                .unwrap_or_default(),
            following: serde_json::from_value(following)?,
        };

        let seen_posts = self.seen_posts(user_id).await?;

        Ok(Some(UserProfile {
            id: user_id,
            user_name,
            email,
            state,
            seen_posts,
        }))
    }

    /// Write the pool trees back. Counter documents are not touched here.
    pub async fn save_state(&self, user_id: Uuid, state: &ProfileState) -> Result<()> {
        let rows = sqlx::query(
            r#"
            UPDATE users
            SET top_interests = $2,
                rising_interests = $3,
                creators_interests = $4,
                following = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(serde_json::to_value(&state.top_interests)?)
        .bind(serde_json::to_value(&state.rising_interests)?)
        .bind(serde_json::to_value(&state.creators)?)
        .bind(serde_json::to_value(&state.following)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save profile {}: {}", user_id, e);
            AppError::Database(e)
        })?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    pub async fn seen_posts(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT post_id FROM seen_posts WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn mark_posts_seen(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<()> {
        if post_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO seen_posts (user_id, post_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(post_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Keyset-paged user id scan for the profile sweep jobs.
    pub async fn user_ids_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM users
            WHERE ($1::uuid IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
