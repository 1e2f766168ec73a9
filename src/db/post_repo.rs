//! Post document storage: metric persistence, counter increments and the
//! sampled feed queries.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Post, WindowEvent};

const POST_COLUMNS: &str = "id, creator, category, sub_category, specific, \
     impression_count, engagement_sum, raw_score, trending_score, \
     short_term_velocity_ema, historical_velocity_ema, bayesian_score, \
     cumulative_score, is_evergreen, is_rising, window_events, \
     created_at, last_trending_update, last_score_update";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    creator: Uuid,
    category: String,
    sub_category: String,
    specific: Option<String>,
    impression_count: i64,
    engagement_sum: f64,
    raw_score: f64,
    trending_score: f64,
    short_term_velocity_ema: f64,
    historical_velocity_ema: f64,
    bayesian_score: f64,
    cumulative_score: f64,
    is_evergreen: bool,
    is_rising: bool,
    window_events: Json<Vec<WindowEvent>>,
    created_at: DateTime<Utc>,
    last_trending_update: DateTime<Utc>,
    last_score_update: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            creator: row.creator,
            category: row.category,
            sub_category: row.sub_category,
            specific: row.specific,
            impression_count: row.impression_count,
            engagement_sum: row.engagement_sum,
            raw_score: row.raw_score,
            trending_score: row.trending_score,
            short_term_velocity_ema: row.short_term_velocity_ema,
            historical_velocity_ema: row.historical_velocity_ema,
            bayesian_score: row.bayesian_score,
            cumulative_score: row.cumulative_score,
            is_evergreen: row.is_evergreen,
            is_rising: row.is_rising,
            window_events: row.window_events.0,
            created_at: row.created_at,
            last_trending_update: row.last_trending_update,
            last_score_update: row.last_score_update,
        }
    }
}

pub struct PostRepo {
    pool: PgPool,
}

impl PostRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, post_id: Uuid) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load post {}: {}", post_id, e);
                AppError::Database(e)
            })?;
        Ok(row.map(Post::from))
    }

    /// Persist the fields recomputed by the metrics engine.
    pub async fn save_metrics(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET raw_score = $2,
                trending_score = $3,
                short_term_velocity_ema = $4,
                historical_velocity_ema = $5,
                bayesian_score = $6,
                cumulative_score = $7,
                is_rising = $8,
                window_events = $9,
                last_trending_update = $10,
                last_score_update = $11
            WHERE id = $1
            "#,
        )
        .bind(post.id)
        .bind(post.raw_score)
        .bind(post.trending_score)
        .bind(post.short_term_velocity_ema)
        .bind(post.historical_velocity_ema)
        .bind(post.bayesian_score)
        .bind(post.cumulative_score)
        .bind(post.is_rising)
        .bind(Json(&post.window_events))
        .bind(post.last_trending_update)
        .bind(post.last_score_update)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Commutative counter increment used by the stats consumer.
    pub async fn bump_counters(
        &self,
        post_id: Uuid,
        impressions: i64,
        engagement: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET impression_count = impression_count + $2,
                engagement_sum = engagement_sum + $3
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .bind(impressions)
        .bind(engagement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Category bucket sample: highest bayesian plus a random slice, within
    /// the chosen subcategories, excluding seen posts and skipped creators.
    pub async fn sample_by_category(
        &self,
        category: &str,
        sub_categories: &[String],
        excluded_creators: &[Uuid],
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        let where_sql = "category = $1 \
             AND (cardinality($2::text[]) = 0 OR sub_category = ANY($2)) \
             AND NOT (creator = ANY($3)) \
             AND NOT (id = ANY($4))";

        let top_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY bayesian_score DESC, created_at DESC LIMIT $5",
            POST_COLUMNS, where_sql
        );
        let random_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY random() LIMIT $5",
            POST_COLUMNS, where_sql
        );

        let mut posts = Vec::new();
        for (sql, limit) in [(top_sql, top_limit), (random_sql, random_limit)] {
            let rows = sqlx::query_as::<_, PostRow>(&sql)
                .bind(category)
                .bind(sub_categories)
                .bind(excluded_creators)
                .bind(seen)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            posts.extend(rows.into_iter().map(Post::from));
        }
        Ok(posts)
    }

    /// Pooled creator sample: top by trending plus a random slice.
    pub async fn sample_by_creators(
        &self,
        creator_ids: &[Uuid],
        excluded_creators: &[Uuid],
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        let where_sql = "creator = ANY($1) AND NOT (creator = ANY($2)) AND NOT (id = ANY($3))";
        let top_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY trending_score DESC, created_at DESC LIMIT $4",
            POST_COLUMNS, where_sql
        );
        let random_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY random() LIMIT $4",
            POST_COLUMNS, where_sql
        );

        let mut posts = Vec::new();
        for (sql, limit) in [(top_sql, top_limit), (random_sql, random_limit)] {
            let rows = sqlx::query_as::<_, PostRow>(&sql)
                .bind(creator_ids)
                .bind(excluded_creators)
                .bind(seen)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            posts.extend(rows.into_iter().map(Post::from));
        }
        Ok(posts)
    }

    pub async fn sample_rising(
        &self,
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        self.sample_general(
            "is_rising = TRUE AND is_evergreen = FALSE AND NOT (id = ANY($1))",
            "trending_score DESC, created_at DESC",
            seen,
            top_limit,
            random_limit,
        )
        .await
    }

    pub async fn sample_trending(
        &self,
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        self.sample_general(
            "is_evergreen = FALSE AND NOT (id = ANY($1))",
            "trending_score DESC, created_at DESC",
            seen,
            top_limit,
            random_limit,
        )
        .await
    }

    pub async fn sample_evergreen(
        &self,
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        self.sample_general(
            "is_evergreen = TRUE AND NOT (id = ANY($1))",
            "trending_score DESC, created_at DESC",
            seen,
            top_limit,
            random_limit,
        )
        .await
    }

    pub async fn sample_recent(
        &self,
        seen: &[Uuid],
        since: DateTime<Utc>,
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        let where_sql = "created_at >= $2 AND NOT (id = ANY($1))";
        let top_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY bayesian_score DESC, created_at DESC LIMIT $3",
            POST_COLUMNS, where_sql
        );
        let random_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY random() LIMIT $3",
            POST_COLUMNS, where_sql
        );

        let mut posts = Vec::new();
        for (sql, limit) in [(top_sql, top_limit), (random_sql, random_limit)] {
            let rows = sqlx::query_as::<_, PostRow>(&sql)
                .bind(seen)
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            posts.extend(rows.into_iter().map(Post::from));
        }
        Ok(posts)
    }

    /// Random unseen posts for exploration padding.
    pub async fn sample_random_unseen(&self, seen: &[Uuid], limit: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE NOT (id = ANY($1)) ORDER BY random() LIMIT $2",
            POST_COLUMNS
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(seen)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn sample_general(
        &self,
        where_sql: &str,
        order_sql: &str,
        seen: &[Uuid],
        top_limit: i64,
        random_limit: i64,
    ) -> Result<Vec<Post>> {
        let top_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY {} LIMIT $2",
            POST_COLUMNS, where_sql, order_sql
        );
        let random_sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY random() LIMIT $2",
            POST_COLUMNS, where_sql
        );

        let mut posts = Vec::new();
        for (sql, limit) in [(top_sql, top_limit), (random_sql, random_limit)] {
            let rows = sqlx::query_as::<_, PostRow>(&sql)
                .bind(seen)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            posts.extend(rows.into_iter().map(Post::from));
        }
        Ok(posts)
    }

    /// Recompute evergreen flags over qualifying posts; a post turning
    /// evergreen has its rising flag cleared in the same statement.
    pub async fn evergreen_sweep(&self, min_raw_score: f64, velocity_ratio: f64) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            WITH flags AS (
                SELECT id,
                       COALESCE(short_term_velocity_ema
                                / NULLIF(historical_velocity_ema, 0), 0) < $2 AS evergreen
                FROM posts
                WHERE raw_score >= $1
            )
            UPDATE posts p
            SET is_evergreen = f.evergreen,
                is_rising = CASE
                    WHEN f.evergreen AND NOT p.is_evergreen THEN FALSE
                    ELSE p.is_rising
                END
            FROM flags f
            WHERE p.id = f.id
            "#,
        )
        .bind(min_raw_score)
        .bind(velocity_ratio)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
