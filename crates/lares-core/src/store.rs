//! Persistent storage traits, one per aggregate.
//!
//! All coordination between workers goes through these traits. Conditional
//! transition methods (`transition_*`) must be implemented as a single
//! targeted update that only succeeds if the row's current status is in the
//! allowed set; they return `false` on mismatch so callers can treat
//! contention as "skip, don't overwrite". Claim methods must be atomic
//! (`SELECT FOR UPDATE SKIP LOCKED` or equivalent) so two workers never
//! claim the same row.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    DedupCandidate, DiscoveredListing, FeatureFlags, Listing, ListingGroup, NewDedupCandidate,
    NewDiscoveredListing, NewListing, NewListingGroup, NewProperty, NewScrapeRun, NewScrapeTask,
    Platform, Property, RunStats, ScrapeRun, ScrapeTask, SearchQuery,
};
use crate::status::{
    DedupStatus, DiscoveredStatus, GroupStatus, RunStatus, TaskKind, TaskStatus,
};

/// Platforms, search queries, schedules, and subsystem feature flags.
pub trait CatalogStore: Send + Sync + Clone {
    fn get_platform(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Platform>, AppError>> + Send;

    fn get_platform_by_slug(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<Platform>, AppError>> + Send;

    fn get_query(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<SearchQuery>, AppError>> + Send;

    /// Queries on active platforms with their activation flag set.
    fn list_active_queries(
        &self,
    ) -> impl Future<Output = Result<Vec<SearchQuery>, AppError>> + Send;

    fn set_next_run_at(
        &self,
        query_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn feature_flags(&self) -> impl Future<Output = Result<FeatureFlags, AppError>> + Send;
}

/// Scrape runs and their computed statistics.
pub trait RunStore: Send + Sync + Clone {
    fn insert_run(
        &self,
        run: NewScrapeRun,
    ) -> impl Future<Output = Result<ScrapeRun, AppError>> + Send;

    fn get_run(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeRun>, AppError>> + Send;

    /// The run in an active status for this query, if any.
    fn find_active_run(
        &self,
        query_id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeRun>, AppError>> + Send;

    /// Conditionally move a run between statuses. Returns `false` if the
    /// run was not in one of `from`.
    fn transition_run(
        &self,
        id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Recompute run stats from child task and listing rows. Pure read.
    fn run_stats(&self, run_id: Uuid) -> impl Future<Output = Result<RunStats, AppError>> + Send;
}

/// Background tasks: discovery pages and listing fetches.
pub trait TaskStore: Send + Sync + Clone {
    fn insert_task(
        &self,
        task: NewScrapeTask,
    ) -> impl Future<Output = Result<ScrapeTask, AppError>> + Send;

    fn get_task(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeTask>, AppError>> + Send;

    /// Atomically claim the oldest pending task for a worker.
    fn claim_next_task(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<ScrapeTask>, AppError>> + Send;

    fn transition_task(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Remove a task row entirely. Retry never resurrects in place.
    fn delete_task(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Remove queued (pending) tasks scoped to a run, optionally one kind.
    fn delete_pending_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn list_tasks(
        &self,
        run_id: Uuid,
        status: Option<TaskStatus>,
    ) -> impl Future<Output = Result<Vec<ScrapeTask>, AppError>> + Send;

    fn count_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
        status: Option<TaskStatus>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Global (pending, running) counts for one task kind.
    fn queue_counts(
        &self,
        kind: TaskKind,
    ) -> impl Future<Output = Result<(u64, u64), AppError>> + Send;

    /// Release all tasks held by a worker (graceful shutdown).
    fn release_worker_tasks(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Discovered listings and scraped listings, including dedup status.
pub trait ListingStore: Send + Sync + Clone {
    /// Insert a discovered listing, or return the existing row when the
    /// same external id was already discovered for this run.
    fn insert_discovered(
        &self,
        listing: NewDiscoveredListing,
    ) -> impl Future<Output = Result<DiscoveredListing, AppError>> + Send;

    fn get_discovered(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<DiscoveredListing>, AppError>> + Send;

    /// Pending discovered listings, priority desc then created_at asc
    /// (stable sort contract), optionally scoped to one platform.
    fn select_pending_discovered(
        &self,
        platform_id: Option<Uuid>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DiscoveredListing>, AppError>> + Send;

    /// Discovered listings under a run still awaiting their fetch
    /// (`Pending` or `Queued`), for resume.
    fn resumable_discovered(
        &self,
        run_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DiscoveredListing>, AppError>> + Send;

    fn transition_discovered(
        &self,
        id: Uuid,
        from: &[DiscoveredStatus],
        to: DiscoveredStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn count_discovered(
        &self,
        run_id: Option<Uuid>,
        status: DiscoveredStatus,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Insert or update the listing for a scraped payload, matching on
    /// platform + external id. An existing listing with a linked property
    /// keeps its dedup status; an unlinked one returns to `Pending`.
    fn upsert_listing(
        &self,
        listing: NewListing,
    ) -> impl Future<Output = Result<Listing, AppError>> + Send;

    fn get_listing(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Listing>, AppError>> + Send;

    fn listings_by_ids(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Listing>, AppError>> + Send;

    /// Listings eligible for dedup: status `Pending`, extracted payload
    /// present, no linked property. Oldest first.
    fn select_dedup_pending(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Listing>, AppError>> + Send;

    /// Comparison pool for matching: unlinked listings with a payload in a
    /// comparable status, excluding the listing under processing.
    fn match_pool(
        &self,
        exclude: Uuid,
    ) -> impl Future<Output = Result<Vec<Listing>, AppError>> + Send;

    fn transition_dedup(
        &self,
        id: Uuid,
        from: &[DedupStatus],
        to: DedupStatus,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Link a listing to its canonical property and mark dedup completed.
    fn set_listing_property(
        &self,
        id: Uuid,
        property_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Reset `Processing` and `Waiting` listings not updated since
    /// `cutoff` back to `Pending`. Returns rows reset. Idempotent.
    fn reset_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_dedup(
        &self,
        status: DedupStatus,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Listing groups, pairwise candidates, and canonical properties.
pub trait GroupStore: Send + Sync + Clone {
    /// Create a group in `PendingReview` with the given member listings.
    fn insert_group(
        &self,
        group: NewListingGroup,
        members: &[Uuid],
    ) -> impl Future<Output = Result<ListingGroup, AppError>> + Send;

    fn get_group(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<ListingGroup>, AppError>> + Send;

    fn group_members(
        &self,
        group_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    /// The open group this listing currently belongs to, if any. A listing
    /// belongs to at most one open group.
    fn active_group_for_listing(
        &self,
        listing_id: Uuid,
    ) -> impl Future<Output = Result<Option<ListingGroup>, AppError>> + Send;

    fn add_member(
        &self,
        group_id: Uuid,
        listing_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn remove_member(
        &self,
        group_id: Uuid,
        listing_id: Uuid,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn transition_group(
        &self,
        id: Uuid,
        from: &[GroupStatus],
        to: GroupStatus,
        reason: Option<&str>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn set_group_quality(
        &self,
        id: Uuid,
        quality_score: f64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Groups awaiting human review, oldest first (queue order).
    fn pending_review(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ListingGroup>, AppError>> + Send;

    fn groups_by_status(
        &self,
        statuses: &[GroupStatus],
    ) -> impl Future<Output = Result<Vec<ListingGroup>, AppError>> + Send;

    /// Reset `ProcessingAi` groups not updated since `cutoff` back to
    /// `PendingAi`. Returns rows reset. Idempotent.
    fn reset_stale_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_groups(
        &self,
        status: GroupStatus,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn insert_candidates(
        &self,
        candidates: &[NewDedupCandidate],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn candidates_for_listing(
        &self,
        listing_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DedupCandidate>, AppError>> + Send;

    fn insert_property(
        &self,
        property: NewProperty,
    ) -> impl Future<Output = Result<Property, AppError>> + Send;

    fn get_property(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Property>, AppError>> + Send;

    fn update_property(
        &self,
        id: Uuid,
        attributes: serde_json::Value,
        quality_score: Option<f64>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// All canonical properties, for matching new listings against.
    fn list_properties(&self) -> impl Future<Output = Result<Vec<Property>, AppError>> + Send;
}
