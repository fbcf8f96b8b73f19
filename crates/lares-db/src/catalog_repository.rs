use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{FeatureFlags, Platform, SearchQuery};
use lares_core::store::CatalogStore;

/// PostgreSQL-backed catalog: platforms, search queries, feature flags.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: Pool<Postgres>,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct PlatformRow {
    id: Uuid,
    name: String,
    slug: String,
    base_url: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<PlatformRow> for Platform {
    fn from(row: PlatformRow) -> Self {
        Platform {
            id: row.id,
            name: row.name,
            slug: row.slug,
            base_url: row.base_url,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SearchQueryRow {
    id: Uuid,
    platform_id: Uuid,
    name: String,
    url: String,
    active: bool,
    auto_run: bool,
    frequency: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SearchQueryRow> for SearchQuery {
    fn from(row: SearchQueryRow) -> Self {
        SearchQuery {
            id: row.id,
            platform_id: row.platform_id,
            name: row.name,
            url: row.url,
            active: row.active,
            auto_run: row.auto_run,
            frequency: row.frequency.and_then(|f| f.parse().ok()),
            next_run_at: row.next_run_at,
            created_at: row.created_at,
        }
    }
}

impl CatalogStore for CatalogRepository {
    async fn get_platform(&self, id: Uuid) -> Result<Option<Platform>, AppError> {
        let row = sqlx::query_as::<_, PlatformRow>(r#"SELECT * FROM platforms WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>, AppError> {
        let row = sqlx::query_as::<_, PlatformRow>(r#"SELECT * FROM platforms WHERE slug = $1"#)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<SearchQuery>, AppError> {
        let row =
            sqlx::query_as::<_, SearchQueryRow>(r#"SELECT * FROM search_queries WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_active_queries(&self) -> Result<Vec<SearchQuery>, AppError> {
        let rows = sqlx::query_as::<_, SearchQueryRow>(
            r#"
            SELECT q.* FROM search_queries q
            JOIN platforms p ON p.id = q.platform_id
            WHERE q.active AND p.active
            ORDER BY q.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_next_run_at(
        &self,
        query_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(r#"UPDATE search_queries SET next_run_at = $2 WHERE id = $1"#)
            .bind(query_id)
            .bind(next_run_at)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("query", query_id));
        }
        Ok(())
    }

    async fn feature_flags(&self) -> Result<FeatureFlags, AppError> {
        let rows: Vec<(String, bool)> =
            sqlx::query_as(r#"SELECT name, enabled FROM feature_flags"#)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // Missing rows default to enabled.
        let mut flags = FeatureFlags::default();
        for (name, enabled) in rows {
            match name.as_str() {
                "dedup" => flags.dedup_enabled = enabled,
                "synthesis" => flags.synthesis_enabled = enabled,
                _ => {}
            }
        }
        Ok(flags)
    }
}
