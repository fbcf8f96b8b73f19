//! Discovery and listing-fetch task execution.
//!
//! Discovery tasks fetch one result page and record discovered listings;
//! pagination is modeled by a successor task carrying a parent reference
//! back to the page-1 task. Fetch tasks scrape one listing's detail into a
//! `Listing` row. Retry deletes the failed task and dispatches a fresh one
//! with the same target.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewDiscoveredListing, NewListing, NewScrapeTask, ScrapeTask, TaskTarget};
use crate::status::{DiscoveredStatus, RunStatus, TaskKind, TaskStatus};
use crate::store::{ListingStore, RunStore, TaskStore};
use crate::traits::Fetcher;

/// Executes discovery and fetch tasks against the fetch collaborator.
#[derive(Clone)]
pub struct TaskManager<S, F> {
    store: S,
    fetcher: F,
}

impl<S, F> TaskManager<S, F>
where
    S: RunStore + TaskStore + ListingStore,
    F: Fetcher,
{
    pub fn new(store: S, fetcher: F) -> Self {
        Self { store, fetcher }
    }

    /// Claim and execute a task by id. Returns `Ok(false)` when another
    /// worker got there first (conflict means skip, not error).
    pub async fn execute_task(&self, task_id: Uuid, worker_id: &str) -> Result<bool, AppError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task", task_id))?;

        if !self
            .store
            .transition_task(task.id, TaskStatus::Pending, TaskStatus::Running, None)
            .await?
        {
            tracing::debug!(%task_id, %worker_id, "Task no longer pending, skipping");
            return Ok(false);
        }

        self.execute_claimed(&task).await?;
        Ok(true)
    }

    /// Execute a task already claimed (status `Running`). Failures are
    /// persisted on the task row before being returned.
    pub async fn execute_claimed(&self, task: &ScrapeTask) -> Result<(), AppError> {
        match &task.target {
            TaskTarget::Page { url, page } => self.run_discovery(task, url, *page).await,
            TaskTarget::Listing { discovered_id } => self.run_fetch(task, *discovered_id).await,
        }
    }

    async fn run_discovery(&self, task: &ScrapeTask, url: &str, page: u32) -> Result<(), AppError> {
        let run = self
            .store
            .get_run(task.run_id)
            .await?
            .ok_or_else(|| AppError::not_found("run", task.run_id))?;

        let result = self.fetcher.discover(url, page).await;
        let page_result = match result {
            Ok(r) => r,
            Err(e) => {
                let msg = e.to_string();
                self.store
                    .transition_task(task.id, TaskStatus::Running, TaskStatus::Failed, Some(&msg))
                    .await?;
                // With no discovery task left to produce listings, the run
                // cannot leave the discovery phase on its own. Fail it so
                // the query becomes schedulable again and the run resumable.
                let open = self
                    .store
                    .count_tasks(run.id, Some(TaskKind::Discovery), Some(TaskStatus::Pending))
                    .await?
                    + self
                        .store
                        .count_tasks(run.id, Some(TaskKind::Discovery), Some(TaskStatus::Running))
                        .await?;
                if open == 0 {
                    self.store
                        .transition_run(run.id, &[RunStatus::Discovering], RunStatus::Failed, Some(&msg))
                        .await?;
                }
                tracing::warn!(task_id = %task.id, %page, error = %msg, "Discovery page failed");
                return Err(e);
            }
        };

        for item in &page_result.listings {
            self.store
                .insert_discovered(NewDiscoveredListing {
                    platform_id: run.platform_id,
                    run_id: run.id,
                    external_id: item.external_id.clone(),
                    url: item.url.clone(),
                    priority: 0,
                })
                .await?;
        }

        self.store
            .transition_task(task.id, TaskStatus::Running, TaskStatus::Completed, None)
            .await?;

        if page < page_result.total_pages {
            // Continue pagination; the chain points back at the page-1 task.
            let successor = NewScrapeTask::page(run.id, url, page + 1)
                .with_parent(task.parent_id.unwrap_or(task.id));
            self.store.insert_task(successor).await?;
        } else {
            // Last page: the discovery phase is over.
            self.store
                .transition_run(
                    run.id,
                    &[RunStatus::Discovering],
                    RunStatus::Scraping,
                    None,
                )
                .await?;
        }

        tracing::info!(
            task_id = %task.id,
            run_id = %run.id,
            %page,
            found = page_result.listings.len(),
            "Discovery page completed"
        );
        Ok(())
    }

    async fn run_fetch(&self, task: &ScrapeTask, discovered_id: Uuid) -> Result<(), AppError> {
        let discovered = self
            .store
            .get_discovered(discovered_id)
            .await?
            .ok_or_else(|| AppError::not_found("discovered listing", discovered_id))?;

        match self.fetcher.scrape(&discovered.url).await {
            Ok(payload) => {
                self.store
                    .upsert_listing(NewListing {
                        platform_id: discovered.platform_id,
                        discovered_id: Some(discovered.id),
                        run_id: Some(discovered.run_id),
                        external_id: Some(discovered.external_id.clone()),
                        url: discovered.url.clone(),
                        payload: Some(payload),
                    })
                    .await?;
                self.store
                    .transition_discovered(
                        discovered.id,
                        &[DiscoveredStatus::Queued, DiscoveredStatus::Pending],
                        DiscoveredStatus::Scraped,
                        None,
                    )
                    .await?;
                self.store
                    .transition_task(task.id, TaskStatus::Running, TaskStatus::Completed, None)
                    .await?;
                self.maybe_complete_run(task.run_id).await?;
                Ok(())
            }
            Err(e) => {
                let msg = e.to_string();
                // A listing that disappeared from the source is skipped for
                // good; anything else is a failure an operator may retry.
                let to = if matches!(e, AppError::TargetNotFound(_)) {
                    DiscoveredStatus::Skipped
                } else {
                    DiscoveredStatus::Failed
                };
                self.store
                    .transition_discovered(
                        discovered.id,
                        &[DiscoveredStatus::Queued, DiscoveredStatus::Pending],
                        to,
                        Some(&msg),
                    )
                    .await?;
                self.store
                    .transition_task(task.id, TaskStatus::Running, TaskStatus::Failed, Some(&msg))
                    .await?;
                self.maybe_complete_run(task.run_id).await?;
                tracing::warn!(task_id = %task.id, error = %msg, "Listing fetch failed");
                Err(e)
            }
        }
    }

    /// Settle a run in the scraping phase once no work remains. A run
    /// where every fetch failed ends `Failed`, not `Completed`.
    async fn maybe_complete_run(&self, run_id: Uuid) -> Result<(), AppError> {
        let open_tasks = self
            .store
            .count_tasks(run_id, None, Some(TaskStatus::Pending))
            .await?
            + self
                .store
                .count_tasks(run_id, None, Some(TaskStatus::Running))
                .await?;
        if open_tasks > 0 {
            return Ok(());
        }
        let waiting = self
            .store
            .count_discovered(Some(run_id), DiscoveredStatus::Pending)
            .await?
            + self
                .store
                .count_discovered(Some(run_id), DiscoveredStatus::Queued)
                .await?;
        if waiting > 0 {
            return Ok(());
        }
        let scraped = self
            .store
            .count_discovered(Some(run_id), DiscoveredStatus::Scraped)
            .await?;
        let failed = self
            .store
            .count_discovered(Some(run_id), DiscoveredStatus::Failed)
            .await?;
        if scraped == 0 && failed > 0 {
            if self
                .store
                .transition_run(
                    run_id,
                    &[RunStatus::Scraping],
                    RunStatus::Failed,
                    Some("every listing fetch failed"),
                )
                .await?
            {
                tracing::warn!(%run_id, failed, "Run failed, no listing scraped");
            }
        } else if self
            .store
            .transition_run(run_id, &[RunStatus::Scraping], RunStatus::Completed, None)
            .await?
        {
            tracing::info!(%run_id, "Run completed");
        }
        Ok(())
    }

    /// Dispatch fetch tasks for up to `batch` pending discovered listings,
    /// highest priority first, ties broken by earliest creation. Returns
    /// the number dispatched.
    pub async fn process_pending_discovered(
        &self,
        platform_id: Option<Uuid>,
        batch: usize,
    ) -> Result<u64, AppError> {
        let rows = self
            .store
            .select_pending_discovered(platform_id, batch)
            .await?;

        let mut dispatched = 0;
        for row in rows {
            // Another dispatcher may race us; a lost transition means skip.
            if !self
                .store
                .transition_discovered(
                    row.id,
                    &[DiscoveredStatus::Pending],
                    DiscoveredStatus::Queued,
                    None,
                )
                .await?
            {
                continue;
            }
            self.store
                .insert_task(NewScrapeTask::listing(row.run_id, row.id))
                .await?;
            dispatched += 1;
        }

        tracing::info!(%dispatched, "Dispatched discovered listings");
        Ok(dispatched)
    }

    /// Retry a failed task: the old row is deleted and an equivalent task
    /// with the same target is dispatched. The task is never resurrected
    /// in place.
    pub async fn retry_task(&self, task_id: Uuid) -> Result<ScrapeTask, AppError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task", task_id))?;

        if task.status != TaskStatus::Failed {
            return Err(AppError::conflict(
                "task",
                task_id,
                TaskStatus::Failed,
                task.status,
            ));
        }

        // Re-queue the discovered listing a failed fetch left behind.
        if let TaskTarget::Listing { discovered_id } = task.target {
            self.store
                .transition_discovered(
                    discovered_id,
                    &[DiscoveredStatus::Failed],
                    DiscoveredStatus::Queued,
                    None,
                )
                .await?;
        }

        self.store.delete_task(task_id).await?;
        let fresh = NewScrapeTask {
            run_id: task.run_id,
            target: task.target,
            parent_id: task.parent_id,
        };
        let new_task = self.store.insert_task(fresh).await?;

        // Retrying under a failed run re-opens the matching phase.
        let phase = match new_task.kind {
            TaskKind::Discovery => RunStatus::Discovering,
            TaskKind::ListingFetch => RunStatus::Scraping,
        };
        self.store
            .transition_run(task.run_id, &[RunStatus::Failed], phase, None)
            .await?;

        tracing::info!(old = %task_id, new = %new_task.id, "Task retried");
        Ok(new_task)
    }

    /// Retry every failed task under a run. Returns the number retried.
    pub async fn retry_all_failed(&self, run_id: Uuid) -> Result<u64, AppError> {
        let failed = self
            .store
            .list_tasks(run_id, Some(TaskStatus::Failed))
            .await?;
        let mut retried = 0;
        for task in failed {
            self.retry_task(task.id).await?;
            retried += 1;
        }
        Ok(retried)
    }
}
