//! Scrape run orchestration: starting, resuming, stopping, and scheduling
//! runs, plus progress computed from persisted rows on every call.

use chrono::{TimeDelta, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewScrapeRun, NewScrapeTask, RunProgress, RunStats, ScrapeRun, SearchQuery};
use crate::status::{DiscoveredStatus, RunStatus};
use crate::store::{CatalogStore, ListingStore, RunStore, TaskStore};

/// Summary of one `run_due` sweep.
#[derive(Debug, Clone, Default)]
pub struct DueRunReport {
    pub started: Vec<Uuid>,
    pub skipped: u64,
    pub failed: u64,
    /// Queries that would have started, when invoked in dry-run mode.
    pub would_start: u64,
}

/// Starts, resumes, and schedules scrape runs.
#[derive(Clone)]
pub struct RunOrchestrator<S> {
    store: S,
}

impl<S> RunOrchestrator<S>
where
    S: CatalogStore + RunStore + TaskStore + ListingStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Start a run for a query. Fails with [`AppError::AlreadyActive`] when
    /// the query already has an active run; in that case no task is
    /// dispatched. The run is created `Pending`, the page-1 discovery task
    /// is enqueued, and the run moves to `Discovering`.
    pub async fn start_run(&self, query_id: Uuid) -> Result<ScrapeRun, AppError> {
        let query = self
            .store
            .get_query(query_id)
            .await?
            .ok_or_else(|| AppError::not_found("query", query_id))?;

        if let Some(active) = self.store.find_active_run(query.id).await? {
            return Err(AppError::AlreadyActive(format!(
                "query {} already has run {} in status {}",
                query.id, active.id, active.status
            )));
        }

        let mut run = self
            .store
            .insert_run(NewScrapeRun {
                query_id: query.id,
                platform_id: query.platform_id,
            })
            .await?;

        self.store
            .insert_task(NewScrapeTask::page(run.id, query.url.clone(), 1))
            .await?;

        if !self
            .store
            .transition_run(run.id, &[RunStatus::Pending], RunStatus::Discovering, None)
            .await?
        {
            return Err(AppError::conflict(
                "run",
                run.id,
                RunStatus::Pending,
                "unknown",
            ));
        }
        run.status = RunStatus::Discovering;

        tracing::info!(run_id = %run.id, query_id = %query.id, "Run started");
        Ok(run)
    }

    /// Resume a stopped or failed run by re-enqueueing fetch tasks for
    /// discovered listings still awaiting their scrape. Returns the number
    /// of tasks enqueued; 0 means nothing was pending and the run is left
    /// untouched.
    pub async fn resume_run(&self, run_id: Uuid) -> Result<usize, AppError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::not_found("run", run_id))?;

        if !run.status.is_resumable() {
            return Err(AppError::conflict(
                "run",
                run_id,
                "stopped or failed",
                run.status,
            ));
        }

        let pending = self.store.resumable_discovered(run_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        if !self
            .store
            .transition_run(
                run_id,
                &[RunStatus::Stopped, RunStatus::Failed],
                RunStatus::Scraping,
                None,
            )
            .await?
        {
            return Err(AppError::conflict(
                "run",
                run_id,
                "stopped or failed",
                "concurrent change",
            ));
        }

        let mut resumed = 0;
        for listing in pending {
            self.store
                .insert_task(NewScrapeTask::listing(run_id, listing.id))
                .await?;
            // Pending rows move to Queued; already-Queued rows just get a
            // fresh task.
            self.store
                .transition_discovered(
                    listing.id,
                    &[DiscoveredStatus::Pending],
                    DiscoveredStatus::Queued,
                    None,
                )
                .await?;
            resumed += 1;
        }

        tracing::info!(%run_id, %resumed, "Run resumed");
        Ok(resumed)
    }

    /// Stop an active run: queued tasks are dropped, discovered listings
    /// stay `Pending` so the run remains resumable.
    pub async fn stop_run(&self, run_id: Uuid) -> Result<u64, AppError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::not_found("run", run_id))?;

        if !self
            .store
            .transition_run(run_id, RunStatus::ACTIVE, RunStatus::Stopped, None)
            .await?
        {
            return Err(AppError::conflict("run", run_id, "active", run.status));
        }

        let cleared = self.store.delete_pending_tasks(run_id, None).await?;
        tracing::info!(%run_id, %cleared, "Run stopped");
        Ok(cleared)
    }

    /// Advance a query's `next_run_at` by its frequency's fixed minute
    /// offset. A query without a frequency gets its schedule cleared.
    pub async fn schedule_next_run(&self, query: &SearchQuery) -> Result<(), AppError> {
        let next = query
            .frequency
            .map(|f| Utc::now() + TimeDelta::minutes(f.minutes()));
        self.store.set_next_run_at(query.id, next).await?;
        tracing::debug!(query_id = %query.id, ?next, "Schedule updated");
        Ok(())
    }

    /// Start runs for all due queries. Queries with an active run are
    /// counted as skipped, never double-started. Per-query failures are
    /// tallied and do not abort the sweep.
    pub async fn run_due(
        &self,
        force: bool,
        dry_run: bool,
        only: Option<Uuid>,
    ) -> Result<DueRunReport, AppError> {
        let queries = match only {
            Some(id) => {
                let query = self
                    .store
                    .get_query(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("query", id))?;
                vec![query]
            }
            None => self.store.list_active_queries().await?,
        };

        let now = Utc::now();
        let mut report = DueRunReport::default();

        for query in queries {
            if !query.is_due(now, force) {
                continue;
            }
            if self.store.find_active_run(query.id).await?.is_some() {
                report.skipped += 1;
                continue;
            }
            if dry_run {
                report.would_start += 1;
                continue;
            }
            match self.start_run(query.id).await {
                Ok(run) => {
                    report.started.push(run.id);
                    self.schedule_next_run(&query).await?;
                }
                Err(AppError::AlreadyActive(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(query_id = %query.id, error = %e, "Failed to start due run");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Recompute run statistics from child rows. Pure read, never cached.
    pub async fn stats(&self, run_id: Uuid) -> Result<RunStats, AppError> {
        if self.store.get_run(run_id).await?.is_none() {
            return Err(AppError::not_found("run", run_id));
        }
        self.store.run_stats(run_id).await
    }

    /// Progress percentages derived from [`stats`](Self::stats).
    pub async fn progress(&self, run_id: Uuid) -> Result<RunProgress, AppError> {
        Ok(RunProgress::from_stats(&self.stats(run_id).await?))
    }
}
