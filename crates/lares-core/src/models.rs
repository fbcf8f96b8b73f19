use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{
    CandidateStatus, DedupStatus, DiscoveredStatus, GroupStatus, RunFrequency, RunStatus,
    TaskKind, TaskStatus,
};

/// A configured listing source (e.g. a portal site).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub base_url: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A recurring search definition on a platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: Uuid,
    pub platform_id: Uuid,
    pub name: String,
    pub url: String,
    pub active: bool,
    pub auto_run: bool,
    pub frequency: Option<RunFrequency>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SearchQuery {
    /// A query is due when active, auto-run enabled, and either forced or
    /// its `next_run_at` has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>, force: bool) -> bool {
        if !self.active || !self.auto_run {
            return false;
        }
        force || self.next_run_at.is_some_and(|at| at <= now)
    }
}

/// One execution of a search query: a discovery phase followed by a
/// scraping phase. At most one run per query may be active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: Uuid,
    pub query_id: Uuid,
    pub platform_id: Uuid,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScrapeRun {
    pub query_id: Uuid,
    pub platform_id: Uuid,
}

/// Aggregate counts for a run, recomputed from child rows on every call.
/// Never persisted or incrementally maintained.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunStats {
    pub discovery_total_pages: u64,
    pub discovery_done_pages: u64,
    pub discovery_failed_pages: u64,
    pub listings_found: u64,
    pub listings_scraped: u64,
    pub listings_failed: u64,
}

/// Percent progress derived from [`RunStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunProgress {
    pub discovery_pct: f64,
    pub scraping_pct: f64,
    /// Weighted overall: discovery 20%, scraping 80%. Scraping dominates
    /// total run duration.
    pub overall_pct: u8,
}

impl RunProgress {
    pub fn from_stats(stats: &RunStats) -> Self {
        let discovery_pct = pct(stats.discovery_done_pages, stats.discovery_total_pages);
        let scraping_pct = pct(stats.listings_scraped, stats.listings_found);
        let overall = (discovery_pct * 0.20 + scraping_pct * 0.80).round();
        RunProgress {
            discovery_pct,
            scraping_pct,
            overall_pct: overall.clamp(0.0, 100.0) as u8,
        }
    }
}

fn pct(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// What a scrape task points at: one search-result page, or one
/// discovered listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskTarget {
    Page { url: String, page: u32 },
    Listing { discovered_id: Uuid },
}

impl TaskTarget {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskTarget::Page { .. } => TaskKind::Discovery,
            TaskTarget::Listing { .. } => TaskKind::ListingFetch,
        }
    }
}

/// An individual background task under a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub id: Uuid,
    pub run_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub target: TaskTarget,
    /// For pagination continuation tasks, the page-1 task that started
    /// the chain.
    pub parent_id: Option<Uuid>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewScrapeTask {
    pub run_id: Uuid,
    pub target: TaskTarget,
    pub parent_id: Option<Uuid>,
}

impl NewScrapeTask {
    pub fn page(run_id: Uuid, url: impl Into<String>, page: u32) -> Self {
        Self {
            run_id,
            target: TaskTarget::Page {
                url: url.into(),
                page,
            },
            parent_id: None,
        }
    }

    pub fn listing(run_id: Uuid, discovered_id: Uuid) -> Self {
        Self {
            run_id,
            target: TaskTarget::Listing { discovered_id },
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// A listing found by a discovery task, waiting for its detail fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredListing {
    pub id: Uuid,
    pub platform_id: Uuid,
    pub run_id: Uuid,
    pub external_id: String,
    pub url: String,
    pub status: DiscoveredStatus,
    /// Higher priority is consumed first; ties break by earliest creation.
    pub priority: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDiscoveredListing {
    pub platform_id: Uuid,
    pub run_id: Uuid,
    pub external_id: String,
    pub url: String,
    pub priority: i32,
}

/// Structured attributes extracted from one listing page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingPayload {
    pub title: Option<String>,
    pub operation: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub size_sqm: Option<f64>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub publisher_name: Option<String>,
    pub publisher_contact: Option<String>,
}

/// Geocoding progress for a listing address. Internals are external to
/// this pipeline; only the status is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeStatus {
    Pending,
    Done,
    Failed,
}

/// A scraped listing record, the unit of deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub platform_id: Uuid,
    pub discovered_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub url: String,
    pub payload: Option<ListingPayload>,
    pub dedup_status: DedupStatus,
    pub geocode_status: GeocodeStatus,
    /// Once set, this listing is never re-entered into dedup processing.
    pub property_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Dedup needs at least one identifying signal to compare on: a title,
    /// a platform external id, or a publisher contact. Listings without
    /// any are left untouched by batch processing.
    pub fn has_identity_signal(&self) -> bool {
        if self.external_id.is_some() {
            return true;
        }
        match &self.payload {
            Some(p) => p.title.is_some() || p.publisher_contact.is_some(),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub platform_id: Uuid,
    pub discovered_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub url: String,
    pub payload: Option<ListingPayload>,
}

/// One pairwise comparison: a listing against another listing, or against
/// an existing canonical property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub other_listing_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub score: f64,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDedupCandidate {
    pub listing_id: Uuid,
    pub other_listing_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub score: f64,
    pub status: CandidateStatus,
}

/// A cluster of listings believed to represent one property, or a single
/// listing compared against an existing property (`matched_property_id`
/// set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingGroup {
    pub id: Uuid,
    pub status: GroupStatus,
    pub match_score: Option<f64>,
    pub matched_property_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewListingGroup {
    pub match_score: Option<f64>,
    pub matched_property_id: Option<Uuid>,
}

/// The canonical output entity produced by synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub attributes: serde_json::Value,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProperty {
    pub attributes: serde_json::Value,
    pub quality_score: Option<f64>,
}

/// Persisted enable flags for the two optional subsystems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub dedup_enabled: bool,
    pub synthesis_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            synthesis_enabled: true,
        }
    }
}

/// Live depth of a named work queue.
///
/// Row status alone lags behind queue state, so callers use this to tell
/// "no work queued" apart from "work queued but not yet reflected in rows".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub reserved: u64,
    pub delayed: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.pending + self.reserved + self.delayed
    }
}

/// Result of a batch operation: per-item failures are tallied, never
/// abort the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: u64,
    pub failed: u64,
}

impl BatchReport {
    pub fn absorb(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}
