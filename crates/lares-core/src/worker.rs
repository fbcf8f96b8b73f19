//! Polling task worker.
//!
//! Workers claim tasks one at a time through [`TaskStore::claim_next_task`]
//! and hand them to the [`TaskManager`]. Multiple workers can run against
//! the same store; claims are atomic, so no task executes twice.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ScrapeTask;
use crate::status::TaskKind;
use crate::store::{ListingStore, RunStore, TaskStore};
use crate::tasks::TaskManager;
use crate::traits::Fetcher;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    TaskClaimed {
        task: &'a ScrapeTask,
    },
    TaskCompleted {
        task_id: Uuid,
        kind: TaskKind,
    },
    TaskFailed {
        task_id: Uuid,
        error: &'a str,
        retryable: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        tasks_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for tasks");
            }
            WorkerEvent::TaskClaimed { task } => {
                tracing::info!(task_id = %task.id, kind = %task.kind, "Task claimed");
            }
            WorkerEvent::TaskCompleted { task_id, kind } => {
                tracing::info!(%task_id, %kind, "Task completed");
            }
            WorkerEvent::TaskFailed {
                task_id,
                error,
                retryable,
            } => {
                tracing::warn!(%task_id, %error, %retryable, "Task failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                tasks_released,
            } => {
                tracing::info!(%worker_id, %tasks_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the task queue and executes scrape tasks.
pub struct TaskWorker<S, F>
where
    S: RunStore + TaskStore + ListingStore,
    F: Fetcher,
{
    store: S,
    manager: TaskManager<S, F>,
    config: WorkerConfig,
}

impl<S, F> TaskWorker<S, F>
where
    S: RunStore + TaskStore + ListingStore,
    F: Fetcher,
{
    pub fn new(store: S, fetcher: F, config: WorkerConfig) -> Self {
        let manager = TaskManager::new(store.clone(), fetcher);
        Self {
            store,
            manager,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.store.claim_next_task(&self.config.worker_id).await {
                Ok(Some(task)) => {
                    reporter.report(WorkerEvent::TaskClaimed { task: &task });
                    // The manager owns the status bookkeeping; the worker
                    // only reports the outcome.
                    match self.manager.execute_claimed(&task).await {
                        Ok(()) => reporter.report(WorkerEvent::TaskCompleted {
                            task_id: task.id,
                            kind: task.kind,
                        }),
                        Err(e) => {
                            let error_msg = e.to_string();
                            reporter.report(WorkerEvent::TaskFailed {
                                task_id: task.id,
                                error: &error_msg,
                                retryable: e.is_retryable(),
                            });
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim task");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release any claimed tasks
        let released = self
            .store
            .release_worker_tasks(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            tasks_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }
}
