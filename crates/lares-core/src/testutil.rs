//! Test utilities: an in-memory store and collaborator stubs.
//!
//! Handwritten doubles for dependency injection in unit tests. The
//! [`MemoryStore`] implements every storage trait over `Arc<Mutex<_>>`
//! state, honoring the same conditional-transition contract as the
//! PostgreSQL layer so coordination behavior can be tested deterministically.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    DedupCandidate, DiscoveredListing, FeatureFlags, GeocodeStatus, Listing, ListingGroup,
    ListingPayload, NewDedupCandidate, NewDiscoveredListing, NewListing, NewListingGroup,
    NewProperty, NewScrapeRun, NewScrapeTask, Platform, Property, RunStats, ScrapeRun, ScrapeTask,
    SearchQuery,
};
use crate::status::{
    DedupStatus, DiscoveredStatus, GroupStatus, RunStatus, TaskKind, TaskStatus,
};
use crate::store::{CatalogStore, GroupStore, ListingStore, RunStore, TaskStore};
use crate::traits::{
    DiscoveryPage, Fetcher, HealthStatus, MatchScorer, SynthesisOutcome, Synthesizer,
};

#[derive(Default)]
struct State {
    platforms: Vec<Platform>,
    queries: Vec<SearchQuery>,
    flags: FeatureFlags,
    runs: Vec<ScrapeRun>,
    tasks: Vec<ScrapeTask>,
    discovered: Vec<DiscoveredListing>,
    listings: Vec<Listing>,
    groups: Vec<ListingGroup>,
    memberships: Vec<(Uuid, Uuid)>, // (group_id, listing_id)
    candidates: Vec<DedupCandidate>,
    properties: Vec<Property>,
    candidate_insert_failures: u32,
}

/// In-memory implementation of all storage traits.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding helpers ----------------------------------------------------

    pub fn add_platform(&self, platform: Platform) {
        self.inner.lock().unwrap().platforms.push(platform);
    }

    pub fn add_query(&self, query: SearchQuery) {
        self.inner.lock().unwrap().queries.push(query);
    }

    pub fn set_flags(&self, flags: FeatureFlags) {
        self.inner.lock().unwrap().flags = flags;
    }

    pub fn add_listing(&self, listing: Listing) {
        self.inner.lock().unwrap().listings.push(listing);
    }

    /// Make the next `insert_candidates` call fail, for error-path tests.
    pub fn fail_next_candidate_insert(&self) {
        self.inner.lock().unwrap().candidate_insert_failures += 1;
    }

    /// Backdate a listing's `updated_at`, for staleness tests.
    pub fn set_listing_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        let mut state = self.inner.lock().unwrap();
        if let Some(l) = state.listings.iter_mut().find(|l| l.id == id) {
            l.updated_at = at;
        }
    }

    /// Backdate a group's `updated_at`, for staleness tests.
    pub fn set_group_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        let mut state = self.inner.lock().unwrap();
        if let Some(g) = state.groups.iter_mut().find(|g| g.id == id) {
            g.updated_at = at;
        }
    }

    /// Override a discovered listing's `created_at`, for ordering tests.
    pub fn set_discovered_created_at(&self, id: Uuid, at: DateTime<Utc>) {
        let mut state = self.inner.lock().unwrap();
        if let Some(d) = state.discovered.iter_mut().find(|d| d.id == id) {
            d.created_at = at;
        }
    }

    pub fn listing(&self, id: Uuid) -> Option<Listing> {
        self.inner
            .lock()
            .unwrap()
            .listings
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    pub fn group(&self, id: Uuid) -> Option<ListingGroup> {
        self.inner
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
    }

    pub fn task_count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }
}

impl CatalogStore for MemoryStore {
    async fn get_platform(&self, id: Uuid) -> Result<Option<Platform>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.platforms.iter().find(|p| p.id == id).cloned())
    }

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.platforms.iter().find(|p| p.slug == slug).cloned())
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<SearchQuery>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.queries.iter().find(|q| q.id == id).cloned())
    }

    async fn list_active_queries(&self) -> Result<Vec<SearchQuery>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .queries
            .iter()
            .filter(|q| {
                q.active
                    && state
                        .platforms
                        .iter()
                        .any(|p| p.id == q.platform_id && p.active)
            })
            .cloned()
            .collect())
    }

    async fn set_next_run_at(
        &self,
        query_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        match state.queries.iter_mut().find(|q| q.id == query_id) {
            Some(q) => {
                q.next_run_at = next_run_at;
                Ok(())
            }
            None => Err(AppError::not_found("query", query_id)),
        }
    }

    async fn feature_flags(&self) -> Result<FeatureFlags, AppError> {
        Ok(self.inner.lock().unwrap().flags)
    }
}

impl RunStore for MemoryStore {
    async fn insert_run(&self, run: NewScrapeRun) -> Result<ScrapeRun, AppError> {
        let now = Utc::now();
        let row = ScrapeRun {
            id: Uuid::new_v4(),
            query_id: run.query_id,
            platform_id: run.platform_id,
            status: RunStatus::Pending,
            error_message: None,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().runs.push(row.clone());
        Ok(row)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn find_active_run(&self, query_id: Uuid) -> Result<Option<ScrapeRun>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .runs
            .iter()
            .find(|r| r.query_id == query_id && r.status.is_active())
            .cloned())
    }

    async fn transition_run(
        &self,
        id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let Some(run) = state.runs.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if !from.contains(&run.status) {
            return Ok(false);
        }
        run.status = to;
        run.updated_at = Utc::now();
        if let Some(e) = error {
            run.error_message = Some(e.to_string());
        }
        if matches!(to, RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped) {
            run.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn run_stats(&self, run_id: Uuid) -> Result<RunStats, AppError> {
        let state = self.inner.lock().unwrap();
        let discovery_tasks = state
            .tasks
            .iter()
            .filter(|t| t.run_id == run_id && t.kind == TaskKind::Discovery);
        let mut stats = RunStats::default();
        for task in discovery_tasks {
            stats.discovery_total_pages += 1;
            match task.status {
                TaskStatus::Completed => stats.discovery_done_pages += 1,
                TaskStatus::Failed => stats.discovery_failed_pages += 1,
                _ => {}
            }
        }
        for d in state.discovered.iter().filter(|d| d.run_id == run_id) {
            stats.listings_found += 1;
            match d.status {
                DiscoveredStatus::Scraped => stats.listings_scraped += 1,
                DiscoveredStatus::Failed => stats.listings_failed += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: NewScrapeTask) -> Result<ScrapeTask, AppError> {
        let now = Utc::now();
        let row = ScrapeTask {
            id: Uuid::new_v4(),
            run_id: task.run_id,
            kind: task.target.kind(),
            status: TaskStatus::Pending,
            target: task.target,
            parent_id: task.parent_id,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.inner.lock().unwrap().tasks.push(row.clone());
        Ok(row)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn claim_next_task(&self, worker_id: &str) -> Result<Option<ScrapeTask>, AppError> {
        let mut state = self.inner.lock().unwrap();
        let pos = state
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .min_by_key(|(_, t)| t.created_at)
            .map(|(i, _)| i);
        match pos {
            Some(i) => {
                let task = &mut state.tasks[i];
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.to_string());
                task.started_at = Some(Utc::now());
                task.updated_at = Utc::now();
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn transition_task(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        if task.status != from {
            return Ok(false);
        }
        task.status = to;
        task.updated_at = Utc::now();
        task.error_message = error.map(|e| e.to_string());
        if to.is_terminal() {
            task.completed_at = Some(Utc::now());
            task.worker_id = None;
        }
        Ok(true)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        Ok(state.tasks.len() < before)
    }

    async fn delete_pending_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
    ) -> Result<u64, AppError> {
        let mut state = self.inner.lock().unwrap();
        let before = state.tasks.len();
        state.tasks.retain(|t| {
            !(t.run_id == run_id
                && t.status == TaskStatus::Pending
                && kind.is_none_or(|k| t.kind == k))
        });
        Ok((before - state.tasks.len()) as u64)
    }

    async fn list_tasks(
        &self,
        run_id: Uuid,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ScrapeTask>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.run_id == run_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }

    async fn count_tasks(
        &self,
        run_id: Uuid,
        kind: Option<TaskKind>,
        status: Option<TaskStatus>,
    ) -> Result<u64, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .tasks
            .iter()
            .filter(|t| {
                t.run_id == run_id
                    && kind.is_none_or(|k| t.kind == k)
                    && status.is_none_or(|s| t.status == s)
            })
            .count() as u64)
    }

    async fn queue_counts(&self, kind: TaskKind) -> Result<(u64, u64), AppError> {
        let state = self.inner.lock().unwrap();
        let pending = state
            .tasks
            .iter()
            .filter(|t| t.kind == kind && t.status == TaskStatus::Pending)
            .count() as u64;
        let running = state
            .tasks
            .iter()
            .filter(|t| t.kind == kind && t.status == TaskStatus::Running)
            .count() as u64;
        Ok((pending, running))
    }

    async fn release_worker_tasks(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for task in state.tasks.iter_mut() {
            if task.worker_id.as_deref() == Some(worker_id) && task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.worker_id = None;
                task.started_at = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

impl ListingStore for MemoryStore {
    async fn insert_discovered(
        &self,
        listing: NewDiscoveredListing,
    ) -> Result<DiscoveredListing, AppError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(existing) = state
            .discovered
            .iter()
            .find(|d| d.run_id == listing.run_id && d.external_id == listing.external_id)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let row = DiscoveredListing {
            id: Uuid::new_v4(),
            platform_id: listing.platform_id,
            run_id: listing.run_id,
            external_id: listing.external_id,
            url: listing.url,
            status: DiscoveredStatus::Pending,
            priority: listing.priority,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.discovered.push(row.clone());
        Ok(row)
    }

    async fn get_discovered(&self, id: Uuid) -> Result<Option<DiscoveredListing>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.discovered.iter().find(|d| d.id == id).cloned())
    }

    async fn select_pending_discovered(
        &self,
        platform_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DiscoveredListing>, AppError> {
        let state = self.inner.lock().unwrap();
        let mut rows: Vec<_> = state
            .discovered
            .iter()
            .filter(|d| {
                d.status == DiscoveredStatus::Pending
                    && platform_id.is_none_or(|p| d.platform_id == p)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn resumable_discovered(&self, run_id: Uuid) -> Result<Vec<DiscoveredListing>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .discovered
            .iter()
            .filter(|d| {
                d.run_id == run_id
                    && matches!(d.status, DiscoveredStatus::Pending | DiscoveredStatus::Queued)
            })
            .cloned()
            .collect())
    }

    async fn transition_discovered(
        &self,
        id: Uuid,
        from: &[DiscoveredStatus],
        to: DiscoveredStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let Some(d) = state.discovered.iter_mut().find(|d| d.id == id) else {
            return Ok(false);
        };
        if !from.contains(&d.status) {
            return Ok(false);
        }
        d.status = to;
        d.updated_at = Utc::now();
        if let Some(e) = error {
            d.error_message = Some(e.to_string());
        }
        Ok(true)
    }

    async fn count_discovered(
        &self,
        run_id: Option<Uuid>,
        status: DiscoveredStatus,
    ) -> Result<u64, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .discovered
            .iter()
            .filter(|d| d.status == status && run_id.is_none_or(|r| d.run_id == r))
            .count() as u64)
    }

    async fn upsert_listing(&self, listing: NewListing) -> Result<Listing, AppError> {
        let mut state = self.inner.lock().unwrap();
        let now = Utc::now();
        let existing = state.listings.iter_mut().find(|l| {
            l.platform_id == listing.platform_id
                && match (&l.external_id, &listing.external_id) {
                    (Some(a), Some(b)) => a == b,
                    _ => l.url == listing.url,
                }
        });
        if let Some(l) = existing {
            l.payload = listing.payload;
            l.discovered_id = listing.discovered_id.or(l.discovered_id);
            l.run_id = listing.run_id.or(l.run_id);
            l.updated_at = now;
            if l.property_id.is_none() {
                l.dedup_status = DedupStatus::Pending;
            }
            return Ok(l.clone());
        }
        let row = Listing {
            id: Uuid::new_v4(),
            platform_id: listing.platform_id,
            discovered_id: listing.discovered_id,
            run_id: listing.run_id,
            external_id: listing.external_id,
            url: listing.url,
            payload: listing.payload,
            dedup_status: DedupStatus::Pending,
            geocode_status: GeocodeStatus::Pending,
            property_id: None,
            created_at: now,
            updated_at: now,
        };
        state.listings.push(row.clone());
        Ok(row)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.listings.iter().find(|l| l.id == id).cloned())
    }

    async fn listings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Listing>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .listings
            .iter()
            .filter(|l| ids.contains(&l.id))
            .cloned()
            .collect())
    }

    async fn select_dedup_pending(&self, limit: usize) -> Result<Vec<Listing>, AppError> {
        let state = self.inner.lock().unwrap();
        let mut rows: Vec<_> = state
            .listings
            .iter()
            .filter(|l| {
                l.dedup_status == DedupStatus::Pending
                    && l.payload.is_some()
                    && l.property_id.is_none()
            })
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn match_pool(&self, exclude: Uuid) -> Result<Vec<Listing>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .listings
            .iter()
            .filter(|l| {
                l.id != exclude
                    && l.payload.is_some()
                    && l.property_id.is_none()
                    && matches!(
                        l.dedup_status,
                        DedupStatus::Pending | DedupStatus::Waiting | DedupStatus::Grouped
                    )
            })
            .cloned()
            .collect())
    }

    async fn transition_dedup(
        &self,
        id: Uuid,
        from: &[DedupStatus],
        to: DedupStatus,
    ) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let Some(l) = state.listings.iter_mut().find(|l| l.id == id) else {
            return Ok(false);
        };
        if !from.contains(&l.dedup_status) {
            return Ok(false);
        }
        l.dedup_status = to;
        l.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_listing_property(&self, id: Uuid, property_id: Uuid) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        match state.listings.iter_mut().find(|l| l.id == id) {
            Some(l) => {
                l.property_id = Some(property_id);
                l.dedup_status = DedupStatus::Completed;
                l.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::not_found("listing", id)),
        }
    }

    async fn reset_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for l in state.listings.iter_mut() {
            let stuck = matches!(
                l.dedup_status,
                DedupStatus::Processing | DedupStatus::Waiting
            );
            if stuck && l.updated_at < cutoff {
                l.dedup_status = DedupStatus::Pending;
                l.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_dedup(&self, status: DedupStatus) -> Result<u64, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .listings
            .iter()
            .filter(|l| l.dedup_status == status)
            .count() as u64)
    }
}

impl GroupStore for MemoryStore {
    async fn insert_group(
        &self,
        group: NewListingGroup,
        members: &[Uuid],
    ) -> Result<ListingGroup, AppError> {
        let mut state = self.inner.lock().unwrap();
        let now = Utc::now();
        let row = ListingGroup {
            id: Uuid::new_v4(),
            status: GroupStatus::PendingReview,
            match_score: group.match_score,
            matched_property_id: group.matched_property_id,
            rejection_reason: None,
            quality_score: None,
            created_at: now,
            updated_at: now,
        };
        for listing_id in members {
            state.memberships.push((row.id, *listing_id));
        }
        state.groups.push(row.clone());
        Ok(row)
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<ListingGroup>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.groups.iter().find(|g| g.id == id).cloned())
    }

    async fn group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .memberships
            .iter()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, l)| *l)
            .collect())
    }

    async fn active_group_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Option<ListingGroup>, AppError> {
        let state = self.inner.lock().unwrap();
        for (group_id, member) in &state.memberships {
            if *member == listing_id {
                if let Some(group) = state
                    .groups
                    .iter()
                    .find(|g| g.id == *group_id && g.status.is_open())
                {
                    return Ok(Some(group.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn add_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        if !state.groups.iter().any(|g| g.id == group_id) {
            return Err(AppError::not_found("group", group_id));
        }
        if !state
            .memberships
            .iter()
            .any(|(g, l)| *g == group_id && *l == listing_id)
        {
            state.memberships.push((group_id, listing_id));
        }
        Ok(())
    }

    async fn remove_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let before = state.memberships.len();
        state
            .memberships
            .retain(|(g, l)| !(*g == group_id && *l == listing_id));
        Ok(state.memberships.len() < before)
    }

    async fn transition_group(
        &self,
        id: Uuid,
        from: &[GroupStatus],
        to: GroupStatus,
        reason: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut state = self.inner.lock().unwrap();
        let Some(g) = state.groups.iter_mut().find(|g| g.id == id) else {
            return Ok(false);
        };
        if !from.contains(&g.status) {
            return Ok(false);
        }
        g.status = to;
        g.updated_at = Utc::now();
        if let Some(r) = reason {
            g.rejection_reason = Some(r.to_string());
        }
        Ok(true)
    }

    async fn set_group_quality(&self, id: Uuid, quality_score: f64) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        match state.groups.iter_mut().find(|g| g.id == id) {
            Some(g) => {
                g.quality_score = Some(quality_score);
                g.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::not_found("group", id)),
        }
    }

    async fn pending_review(&self, limit: usize) -> Result<Vec<ListingGroup>, AppError> {
        let state = self.inner.lock().unwrap();
        let mut rows: Vec<_> = state
            .groups
            .iter()
            .filter(|g| g.status == GroupStatus::PendingReview)
            .cloned()
            .collect();
        rows.sort_by_key(|g| g.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn groups_by_status(
        &self,
        statuses: &[GroupStatus],
    ) -> Result<Vec<ListingGroup>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| statuses.contains(&g.status))
            .cloned()
            .collect())
    }

    async fn reset_stale_groups(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for g in state.groups.iter_mut() {
            if g.status == GroupStatus::ProcessingAi && g.updated_at < cutoff {
                g.status = GroupStatus::PendingAi;
                g.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_groups(&self, status: GroupStatus) -> Result<u64, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.groups.iter().filter(|g| g.status == status).count() as u64)
    }

    async fn insert_candidates(&self, candidates: &[NewDedupCandidate]) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        if state.candidate_insert_failures > 0 {
            state.candidate_insert_failures -= 1;
            return Err(AppError::DatabaseError("insert refused".into()));
        }
        for c in candidates {
            state.candidates.push(DedupCandidate {
                id: Uuid::new_v4(),
                listing_id: c.listing_id,
                other_listing_id: c.other_listing_id,
                property_id: c.property_id,
                score: c.score,
                status: c.status,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn candidates_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<DedupCandidate>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .candidates
            .iter()
            .filter(|c| c.listing_id == listing_id)
            .cloned()
            .collect())
    }

    async fn insert_property(&self, property: NewProperty) -> Result<Property, AppError> {
        let now = Utc::now();
        let row = Property {
            id: Uuid::new_v4(),
            attributes: property.attributes,
            quality_score: property.quality_score,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().properties.push(row.clone());
        Ok(row)
    }

    async fn get_property(&self, id: Uuid) -> Result<Option<Property>, AppError> {
        let state = self.inner.lock().unwrap();
        Ok(state.properties.iter().find(|p| p.id == id).cloned())
    }

    async fn update_property(
        &self,
        id: Uuid,
        attributes: serde_json::Value,
        quality_score: Option<f64>,
    ) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap();
        match state.properties.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.attributes = attributes;
                if quality_score.is_some() {
                    p.quality_score = quality_score;
                }
                p.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::not_found("property", id)),
        }
    }

    async fn list_properties(&self) -> Result<Vec<Property>, AppError> {
        Ok(self.inner.lock().unwrap().properties.clone())
    }
}

// ---------------------------------------------------------------------------
// StubFetcher
// ---------------------------------------------------------------------------

/// Fetcher double with scripted responses. Each call pops the next queued
/// result; an empty queue returns an empty page / default payload.
#[derive(Clone, Default)]
pub struct StubFetcher {
    discover_responses: Arc<Mutex<Vec<Result<DiscoveryPage, AppError>>>>,
    scrape_responses: Arc<Mutex<Vec<Result<ListingPayload, AppError>>>>,
    pub discover_calls: Arc<Mutex<Vec<(String, u32)>>>,
    pub scrape_calls: Arc<Mutex<Vec<String>>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_discover(&self, response: Result<DiscoveryPage, AppError>) {
        self.discover_responses.lock().unwrap().push(response);
    }

    pub fn push_scrape(&self, response: Result<ListingPayload, AppError>) {
        self.scrape_responses.lock().unwrap().push(response);
    }
}

impl Fetcher for StubFetcher {
    async fn discover(&self, url: &str, page: u32) -> Result<DiscoveryPage, AppError> {
        self.discover_calls
            .lock()
            .unwrap()
            .push((url.to_string(), page));
        let mut responses = self.discover_responses.lock().unwrap();
        if responses.is_empty() {
            Ok(DiscoveryPage {
                total_results: 0,
                total_pages: 0,
                listings: vec![],
            })
        } else {
            responses.remove(0)
        }
    }

    async fn scrape(&self, url: &str) -> Result<ListingPayload, AppError> {
        self.scrape_calls.lock().unwrap().push(url.to_string());
        let mut responses = self.scrape_responses.lock().unwrap();
        if responses.is_empty() {
            Ok(ListingPayload::default())
        } else {
            responses.remove(0)
        }
    }

    async fn health(&self) -> Result<HealthStatus, AppError> {
        Ok(HealthStatus {
            status: "ok".into(),
            ready: true,
        })
    }
}

// ---------------------------------------------------------------------------
// StubSynthesizer
// ---------------------------------------------------------------------------

/// Synthesizer double returning a fixed outcome or rejection.
#[derive(Clone)]
pub struct StubSynthesizer {
    response: Arc<Mutex<Result<SynthesisOutcome, AppError>>>,
    pub calls: Arc<Mutex<Vec<Uuid>>>,
}

impl StubSynthesizer {
    pub fn success(quality_score: f64) -> Self {
        Self {
            response: Arc::new(Mutex::new(Ok(SynthesisOutcome {
                attributes: serde_json::json!({"synthesized": true}),
                quality_score,
            }))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Err(AppError::SynthesisRejected(
                reason.to_string(),
            )))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Synthesizer for StubSynthesizer {
    async fn synthesize(
        &self,
        group_id: Uuid,
        _listings: &[ListingPayload],
    ) -> Result<SynthesisOutcome, AppError> {
        self.calls.lock().unwrap().push(group_id);
        match &*self.response.lock().unwrap() {
            Ok(outcome) => Ok(outcome.clone()),
            Err(AppError::SynthesisRejected(reason)) => {
                Err(AppError::SynthesisRejected(reason.clone()))
            }
            Err(_) => Err(AppError::Generic("stub failure".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// FixedScorer
// ---------------------------------------------------------------------------

/// Scorer double returning a constant confidence for every pair.
#[derive(Clone, Copy)]
pub struct FixedScorer(pub f64);

impl MatchScorer for FixedScorer {
    fn score(&self, _a: &ListingPayload, _b: &ListingPayload) -> f64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub fn make_platform() -> Platform {
    Platform {
        id: Uuid::new_v4(),
        name: "Test Portal".into(),
        slug: "test-portal".into(),
        base_url: "https://portal.test".into(),
        active: true,
        created_at: Utc::now(),
    }
}

pub fn make_query(platform_id: Uuid) -> SearchQuery {
    SearchQuery {
        id: Uuid::new_v4(),
        platform_id,
        name: "flats-centro".into(),
        url: "https://portal.test/search?q=centro".into(),
        active: true,
        auto_run: true,
        frequency: Some(crate::status::RunFrequency::Daily),
        next_run_at: None,
        created_at: Utc::now(),
    }
}

pub fn make_payload(title: &str) -> ListingPayload {
    ListingPayload {
        title: Some(title.to_string()),
        operation: Some("sale".into()),
        price: Some(250_000.0),
        currency: Some("EUR".into()),
        bedrooms: Some(3),
        bathrooms: Some(2),
        size_sqm: Some(95.0),
        street: Some("Calle Mayor 12".into()),
        city: Some("Madrid".into()),
        region: Some("Madrid".into()),
        postal_code: Some("28013".into()),
        country: Some("ES".into()),
        image_urls: vec![],
        amenities: vec!["terrace".into()],
        publisher_name: Some("Inmo Test".into()),
        publisher_contact: Some("+34 600 111 222".into()),
    }
}

pub fn make_listing(platform_id: Uuid, payload: Option<ListingPayload>) -> Listing {
    Listing {
        id: Uuid::new_v4(),
        platform_id,
        discovered_id: None,
        run_id: None,
        external_id: None,
        url: format!("https://portal.test/listing/{}", Uuid::new_v4()),
        payload,
        dedup_status: DedupStatus::Pending,
        geocode_status: GeocodeStatus::Pending,
        property_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn make_discovery_page(urls: &[&str], total_pages: u32) -> DiscoveryPage {
    DiscoveryPage {
        total_results: urls.len() as u64,
        total_pages,
        listings: urls
            .iter()
            .map(|u| crate::traits::DiscoveredItem {
                url: u.to_string(),
                external_id: u.rsplit('/').next().unwrap_or(u).to_string(),
            })
            .collect(),
    }
}
