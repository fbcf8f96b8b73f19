use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{NewScrapeRun, RunStats, ScrapeRun};
use lares_core::status::RunStatus;
use lares_core::store::RunStore;

/// PostgreSQL-backed scrape runs. Stats are recomputed from child rows on
/// every call, never cached.
#[derive(Clone)]
pub struct RunRepository {
    pool: Pool<Postgres>,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ScrapeRunRow {
    id: Uuid,
    query_id: Uuid,
    platform_id: Uuid,
    status: String,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScrapeRunRow> for ScrapeRun {
    fn from(row: ScrapeRunRow) -> Self {
        ScrapeRun {
            id: row.id,
            query_id: row.query_id,
            platform_id: row.platform_id,
            status: row.status.parse().unwrap_or(RunStatus::Pending),
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn status_strings(statuses: &[RunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

impl RunStore for RunRepository {
    async fn insert_run(&self, run: NewScrapeRun) -> Result<ScrapeRun, AppError> {
        let row = sqlx::query_as::<_, ScrapeRunRow>(
            r#"
            INSERT INTO scrape_runs (query_id, platform_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(run.query_id)
        .bind(run.platform_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        let row = sqlx::query_as::<_, ScrapeRunRow>(r#"SELECT * FROM scrape_runs WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn find_active_run(&self, query_id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        let row = sqlx::query_as::<_, ScrapeRunRow>(
            r#"
            SELECT * FROM scrape_runs
            WHERE query_id = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(query_id)
        .bind(status_strings(RunStatus::ACTIVE))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn transition_run(
        &self,
        id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        // The status check lives in the WHERE clause: the update only wins
        // when the row is still in one of `from`.
        let result = sqlx::query(
            r#"
            UPDATE scrape_runs
            SET status = $3,
                error_message = COALESCE($4, error_message),
                started_at = CASE WHEN $3 = 'discovering' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'failed', 'stopped')
                               THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(status_strings(from))
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn run_stats(&self, run_id: Uuid) -> Result<RunStats, AppError> {
        let (total_pages, done_pages, failed_pages): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'completed'),
                   COUNT(*) FILTER (WHERE status = 'failed')
            FROM scrape_tasks
            WHERE run_id = $1 AND kind = 'discovery'
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let (found, scraped, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'scraped'),
                   COUNT(*) FILTER (WHERE status = 'failed')
            FROM discovered_listings
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(RunStats {
            discovery_total_pages: total_pages as u64,
            discovery_done_pages: done_pages as u64,
            discovery_failed_pages: failed_pages as u64,
            listings_found: found as u64,
            listings_scraped: scraped as u64,
            listings_failed: failed as u64,
        })
    }
}
