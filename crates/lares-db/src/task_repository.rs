use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{NewScrapeTask, ScrapeTask, TaskTarget};
use lares_core::status::{TaskKind, TaskStatus};
use lares_core::store::TaskStore;

/// PostgreSQL-backed task queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct TaskRepository {
    pool: Pool<Postgres>,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ScrapeTaskRow {
    id: Uuid,
    run_id: Uuid,
    kind: String,
    status: String,
    target: serde_json::Value,
    parent_id: Option<Uuid>,
    worker_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScrapeTaskRow> for ScrapeTask {
    type Error = AppError;

    fn try_from(row: ScrapeTaskRow) -> Result<Self, AppError> {
        let target: TaskTarget = serde_json::from_value(row.target)?;
        Ok(ScrapeTask {
            id: row.id,
            run_id: row.run_id,
            kind: row.kind.parse().unwrap_or_else(|_| target.kind()),
            status: row.status.parse().unwrap_or(TaskStatus::Pending),
            target,
            parent_id: row.parent_id,
            worker_id: row.worker_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn collect(rows: Vec<ScrapeTaskRow>) -> Result<Vec<ScrapeTask>, AppError> {
    rows.into_iter().map(TryInto::try_into).collect()
}

impl TaskStore for TaskRepository {
    async fn insert_task(&self, task: NewScrapeTask) -> Result<ScrapeTask, AppError> {
        let kind = task.target.kind();
        let target = serde_json::to_value(&task.target)?;
        let row = sqlx::query_as::<_, ScrapeTaskRow>(
            r#"
            INSERT INTO scrape_tasks (run_id, kind, target, parent_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(task.run_id)
        .bind(kind.as_str())
        .bind(target)
        .bind(task.parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError> {
        let row = sqlx::query_as::<_, ScrapeTaskRow>(r#"SELECT * FROM scrape_tasks WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn claim_next_task(&self, worker_id: &str) -> Result<Option<ScrapeTask>, AppError> {
        let row = sqlx::query_as::<_, ScrapeTaskRow>(
            r#"
            UPDATE scrape_tasks
            SET status = 'running', worker_id = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM scrape_tasks
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn transition_task(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_tasks
            SET status = $3,
                error_message = COALESCE($4, error_message),
                started_at = CASE WHEN $3 = 'running' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'failed')
                               THEN NOW() ELSE completed_at END,
                worker_id = CASE WHEN $3 IN ('completed', 'failed')
                            THEN NULL ELSE worker_id END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(r#"DELETE FROM scrape_tasks WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_pending_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scrape_tasks
            WHERE run_id = $1 AND status = 'pending'
              AND ($2::text IS NULL OR kind = $2)
            "#,
        )
        .bind(run_id)
        .bind(kind.map(|k| k.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn list_tasks(
        &self,
        run_id: Uuid,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ScrapeTask>, AppError> {
        let rows = sqlx::query_as::<_, ScrapeTaskRow>(
            r#"
            SELECT * FROM scrape_tasks
            WHERE run_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(run_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        collect(rows)
    }

    async fn count_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
        status: Option<TaskStatus>,
    ) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM scrape_tasks
            WHERE run_id = $1
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
            "#,
        )
        .bind(run_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as u64)
    }

    async fn queue_counts(&self, kind: TaskKind) -> Result<(u64, u64), AppError> {
        let (pending, running): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'pending'),
                   COUNT(*) FILTER (WHERE status = 'running')
            FROM scrape_tasks
            WHERE kind = $1
            "#,
        )
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok((pending as u64, running as u64))
    }

    async fn release_worker_tasks(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_tasks
            SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE worker_id = $1 AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
