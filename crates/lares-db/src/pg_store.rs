//! Aggregate store handle.
//!
//! Pipeline services take a single store generic bounded over several of
//! the store traits. [`PgStore`] implements all five by delegating to the
//! per-aggregate repositories over one shared pool.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{
    DedupCandidate, DiscoveredListing, FeatureFlags, Listing, ListingGroup, NewDedupCandidate,
    NewDiscoveredListing, NewListing, NewListingGroup, NewProperty, NewScrapeRun, NewScrapeTask,
    Platform, Property, RunStats, ScrapeRun, ScrapeTask, SearchQuery,
};
use lares_core::status::{
    DedupStatus, DiscoveredStatus, GroupStatus, RunStatus, TaskKind, TaskStatus,
};
use lares_core::store::{CatalogStore, GroupStore, ListingStore, RunStore, TaskStore};

use crate::catalog_repository::CatalogRepository;
use crate::group_repository::GroupRepository;
use crate::listing_repository::ListingRepository;
use crate::run_repository::RunRepository;
use crate::task_repository::TaskRepository;

#[derive(Clone)]
pub struct PgStore {
    catalog: CatalogRepository,
    runs: RunRepository,
    tasks: TaskRepository,
    listings: ListingRepository,
    groups: GroupRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            catalog: CatalogRepository::new(pool.clone()),
            runs: RunRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            listings: ListingRepository::new(pool.clone()),
            groups: GroupRepository::new(pool),
        }
    }
}

impl CatalogStore for PgStore {
    async fn get_platform(&self, id: Uuid) -> Result<Option<Platform>, AppError> {
        self.catalog.get_platform(id).await
    }

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>, AppError> {
        self.catalog.get_platform_by_slug(slug).await
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<SearchQuery>, AppError> {
        self.catalog.get_query(id).await
    }

    async fn list_active_queries(&self) -> Result<Vec<SearchQuery>, AppError> {
        self.catalog.list_active_queries().await
    }

    async fn set_next_run_at(
        &self,
        query_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.catalog.set_next_run_at(query_id, next_run_at).await
    }

    async fn feature_flags(&self) -> Result<FeatureFlags, AppError> {
        self.catalog.feature_flags().await
    }
}

impl RunStore for PgStore {
    async fn insert_run(&self, run: NewScrapeRun) -> Result<ScrapeRun, AppError> {
        self.runs.insert_run(run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        self.runs.get_run(id).await
    }

    async fn find_active_run(&self, query_id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        self.runs.find_active_run(query_id).await
    }

    async fn transition_run(
        &self,
        id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        self.runs.transition_run(id, from, to, error).await
    }

    async fn run_stats(&self, run_id: Uuid) -> Result<RunStats, AppError> {
        self.runs.run_stats(run_id).await
    }
}

impl TaskStore for PgStore {
    async fn insert_task(&self, task: NewScrapeTask) -> Result<ScrapeTask, AppError> {
        self.tasks.insert_task(task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError> {
        self.tasks.get_task(id).await
    }

    async fn claim_next_task(&self, worker_id: &str) -> Result<Option<ScrapeTask>, AppError> {
        self.tasks.claim_next_task(worker_id).await
    }

    async fn transition_task(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        self.tasks.transition_task(id, from, to, error).await
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, AppError> {
        self.tasks.delete_task(id).await
    }

    async fn delete_pending_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
    ) -> Result<u64, AppError> {
        self.tasks.delete_pending_tasks(run_id, kind).await
    }

    async fn list_tasks(
        &self,
        run_id: Uuid,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ScrapeTask>, AppError> {
        self.tasks.list_tasks(run_id, status).await
    }

    async fn count_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
        status: Option<TaskStatus>,
    ) -> Result<u64, AppError> {
        self.tasks.count_tasks(run_id, kind, status).await
    }

    async fn queue_counts(&self, kind: TaskKind) -> Result<(u64, u64), AppError> {
        self.tasks.queue_counts(kind).await
    }

    async fn release_worker_tasks(&self, worker_id: &str) -> Result<u64, AppError> {
        self.tasks.release_worker_tasks(worker_id).await
    }
}

impl ListingStore for PgStore {
    async fn insert_discovered(
        &self,
        listing: NewDiscoveredListing,
    ) -> Result<DiscoveredListing, AppError> {
        self.listings.insert_discovered(listing).await
    }

    async fn get_discovered(&self, id: Uuid) -> Result<Option<DiscoveredListing>, AppError> {
        self.listings.get_discovered(id).await
    }

    async fn select_pending_discovered(
        &self,
        platform_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DiscoveredListing>, AppError> {
        self.listings
            .select_pending_discovered(platform_id, limit)
            .await
    }

    async fn resumable_discovered(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<DiscoveredListing>, AppError> {
        self.listings.resumable_discovered(run_id).await
    }

    async fn transition_discovered(
        &self,
        id: Uuid,
        from: &[DiscoveredStatus],
        to: DiscoveredStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        self.listings.transition_discovered(id, from, to, error).await
    }

    async fn count_discovered(
        &self,
        run_id: Option<Uuid>,
        status: DiscoveredStatus,
    ) -> Result<u64, AppError> {
        self.listings.count_discovered(run_id, status).await
    }

    async fn upsert_listing(&self, listing: NewListing) -> Result<Listing, AppError> {
        self.listings.upsert_listing(listing).await
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, AppError> {
        self.listings.get_listing(id).await
    }

    async fn listings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Listing>, AppError> {
        self.listings.listings_by_ids(ids).await
    }

    async fn select_dedup_pending(&self, limit: usize) -> Result<Vec<Listing>, AppError> {
        self.listings.select_dedup_pending(limit).await
    }

    async fn match_pool(&self, exclude: Uuid) -> Result<Vec<Listing>, AppError> {
        self.listings.match_pool(exclude).await
    }

    async fn transition_dedup(
        &self,
        id: Uuid,
        from: &[DedupStatus],
        to: DedupStatus,
    ) -> Result<bool, AppError> {
        self.listings.transition_dedup(id, from, to).await
    }

    async fn set_listing_property(&self, id: Uuid, property_id: Uuid) -> Result<(), AppError> {
        self.listings.set_listing_property(id, property_id).await
    }

    async fn reset_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        self.listings.reset_stale_processing(cutoff).await
    }

    async fn count_dedup(&self, status: DedupStatus) -> Result<u64, AppError> {
        self.listings.count_dedup(status).await
    }
}

impl GroupStore for PgStore {
    async fn insert_group(
        &self,
        group: NewListingGroup,
        members: &[Uuid],
    ) -> Result<ListingGroup, AppError> {
        self.groups.insert_group(group, members).await
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<ListingGroup>, AppError> {
        self.groups.get_group(id).await
    }

    async fn group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        self.groups.group_members(group_id).await
    }

    async fn active_group_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Option<ListingGroup>, AppError> {
        self.groups.active_group_for_listing(listing_id).await
    }

    async fn add_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<(), AppError> {
        self.groups.add_member(group_id, listing_id).await
    }

    async fn remove_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<bool, AppError> {
        self.groups.remove_member(group_id, listing_id).await
    }

    async fn transition_group(
        &self,
        id: Uuid,
        from: &[GroupStatus],
        to: GroupStatus,
        reason: Option<&str>,
    ) -> Result<bool, AppError> {
        self.groups.transition_group(id, from, to, reason).await
    }

    async fn set_group_quality(&self, id: Uuid, quality_score: f64) -> Result<(), AppError> {
        self.groups.set_group_quality(id, quality_score).await
    }

    async fn pending_review(&self, limit: usize) -> Result<Vec<ListingGroup>, AppError> {
        self.groups.pending_review(limit).await
    }

    async fn groups_by_status(
        &self,
        statuses: &[GroupStatus],
    ) -> Result<Vec<ListingGroup>, AppError> {
        self.groups.groups_by_status(statuses).await
    }

    async fn reset_stale_groups(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        self.groups.reset_stale_groups(cutoff).await
    }

    async fn count_groups(&self, status: GroupStatus) -> Result<u64, AppError> {
        self.groups.count_groups(status).await
    }

    async fn insert_candidates(&self, candidates: &[NewDedupCandidate]) -> Result<(), AppError> {
        self.groups.insert_candidates(candidates).await
    }

    async fn candidates_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<DedupCandidate>, AppError> {
        self.groups.candidates_for_listing(listing_id).await
    }

    async fn insert_property(&self, property: NewProperty) -> Result<Property, AppError> {
        self.groups.insert_property(property).await
    }

    async fn get_property(&self, id: Uuid) -> Result<Option<Property>, AppError> {
        self.groups.get_property(id).await
    }

    async fn update_property(
        &self,
        id: Uuid,
        attributes: serde_json::Value,
        quality_score: Option<f64>,
    ) -> Result<(), AppError> {
        self.groups.update_property(id, attributes, quality_score).await
    }

    async fn list_properties(&self) -> Result<Vec<Property>, AppError> {
        self.groups.list_properties().await
    }
}
