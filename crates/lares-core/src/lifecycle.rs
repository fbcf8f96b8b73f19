//! Job lifecycle maintenance: stale-claim recovery, operator
//! cancellations, and queue-depth reporting.
//!
//! Stale recovery exists because a worker can die between claiming a row
//! and finishing it. Claims carry no lease; instead, rows stuck in a
//! processing status past a cutoff are handed back to their pending
//! status. The reset is idempotent and safe to run on a timer.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::models::QueueDepth;
use crate::status::{DedupStatus, DiscoveredStatus, GroupStatus, TaskKind};
use crate::store::{GroupStore, ListingStore, RunStore, TaskStore};

/// Rows handed back by one stale-recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleReport {
    pub listings_reset: u64,
    pub groups_reset: u64,
}

#[derive(Clone)]
pub struct JobLifecycleManager<S> {
    store: S,
    config: PipelineConfig,
}

impl<S> JobLifecycleManager<S>
where
    S: RunStore + TaskStore + ListingStore + GroupStore,
{
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Reset abandoned claims older than `age` (default from config,
    /// 5 minutes): dedup listings stuck in `Processing` or parked in
    /// `Waiting` return to `Pending`, groups stuck in `ProcessingAi`
    /// return to `PendingAi`.
    pub async fn reset_stale(&self, age: Option<Duration>) -> Result<StaleReport, AppError> {
        let age = age.unwrap_or(self.config.stale_after);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age)
                .map_err(|e| AppError::ConfigError(format!("Invalid stale age: {e}")))?;

        let listings_reset = self.store.reset_stale_processing(cutoff).await?;
        let groups_reset = self.store.reset_stale_groups(cutoff).await?;
        if listings_reset > 0 || groups_reset > 0 {
            tracing::info!(listings_reset, groups_reset, %cutoff, "Reset stale claims");
        }
        Ok(StaleReport {
            listings_reset,
            groups_reset,
        })
    }

    /// Cancel all in-flight dedup work: every listing in `Processing` or
    /// `Waiting` returns to `Pending`, regardless of age. Returns the
    /// number of listings reset.
    pub async fn cancel_dedup(&self) -> Result<u64, AppError> {
        // A cutoff of now catches every in-flight claim.
        let reset = self.store.reset_stale_processing(Utc::now()).await?;
        tracing::info!(reset, "Dedup cancelled, in-flight listings returned to pending");
        Ok(reset)
    }

    /// Withdraw a single listing from dedup entirely. Only listings still
    /// moving through matching can be withdrawn.
    pub async fn withdraw_from_dedup(&self, listing_id: Uuid) -> Result<(), AppError> {
        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| AppError::not_found("listing", listing_id))?;

        if !self
            .store
            .transition_dedup(
                listing_id,
                &[
                    DedupStatus::Pending,
                    DedupStatus::Processing,
                    DedupStatus::Waiting,
                ],
                DedupStatus::Cancelled,
            )
            .await?
        {
            return Err(AppError::conflict(
                "listing",
                listing_id,
                "pending, processing or waiting",
                listing.dedup_status,
            ));
        }
        tracing::info!(%listing_id, "Listing withdrawn from dedup");
        Ok(())
    }

    /// Withdraw a group from the synthesis queue. The group fails with a
    /// cancellation reason. A singleton group that never matched an
    /// existing property takes its lone member down with it; members of a
    /// multi-member group detach and return to independent processing.
    /// Returns the number of member listings affected.
    pub async fn cancel_synthesis(&self, group_id: Uuid) -> Result<u64, AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("group", group_id))?;

        if !self
            .store
            .transition_group(
                group_id,
                &[GroupStatus::PendingAi, GroupStatus::ProcessingAi],
                GroupStatus::Failed,
                Some("cancelled by operator"),
            )
            .await?
        {
            return Err(AppError::conflict(
                "group",
                group_id,
                "pending or processing synthesis",
                group.status,
            ));
        }

        let members = self.store.group_members(group_id).await?;
        let affected = members.len() as u64;
        if members.len() == 1 && group.matched_property_id.is_none() {
            self.store
                .transition_dedup(
                    members[0],
                    &[DedupStatus::Grouped, DedupStatus::Waiting],
                    DedupStatus::Failed,
                )
                .await?;
        } else {
            for listing_id in members {
                self.store.remove_member(group_id, listing_id).await?;
                self.store
                    .transition_dedup(
                        listing_id,
                        &[DedupStatus::Grouped, DedupStatus::Waiting],
                        DedupStatus::Pending,
                    )
                    .await?;
            }
        }
        tracing::info!(%group_id, affected, "Synthesis cancelled for group");
        Ok(affected)
    }

    /// Drop the queued tasks of one run, optionally a single kind.
    /// Running tasks are left to finish; this only clears the backlog.
    pub async fn cancel_run_phase(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
    ) -> Result<u64, AppError> {
        if self.store.get_run(run_id).await?.is_none() {
            return Err(AppError::not_found("run", run_id));
        }
        let cleared = self.store.delete_pending_tasks(run_id, kind).await?;
        tracing::info!(%run_id, ?kind, cleared, "Cleared queued tasks");
        Ok(cleared)
    }

    /// Depth of one task queue, recomputed from rows on every call.
    ///
    /// `pending` and `reserved` come straight from task statuses. Tasks
    /// carry no scheduled-delay column, so `delayed` counts discovered
    /// listings already dispatched but not yet fetched; it is zero for
    /// the discovery queue.
    pub async fn queue_depth(&self, kind: TaskKind) -> Result<QueueDepth, AppError> {
        let (pending, reserved) = self.store.queue_counts(kind).await?;
        let delayed = match kind {
            TaskKind::ListingFetch => {
                self.store
                    .count_discovered(None, DiscoveredStatus::Queued)
                    .await?
            }
            TaskKind::Discovery => 0,
        };
        Ok(QueueDepth {
            pending,
            reserved,
            delayed,
        })
    }
}
