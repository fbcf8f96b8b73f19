//! Status state machines for every pipeline entity.
//!
//! Row status is the only coordination primitive in Lares: there is no
//! distributed lock. Each enum carries an explicit allowed-transition table,
//! and every mutation goes through a conditional update that only succeeds
//! when the prior state matches. A failed condition surfaces as a conflict
//! and the caller skips, never overwrites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a scrape run.
///
/// `Pending → Discovering → Scraping → {Completed | Failed}`; an explicit
/// stop from any active state lands in `Stopped`. `Stopped` and `Failed`
/// are the only resumable terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Discovering,
    Scraping,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Discovering => "discovering",
            RunStatus::Scraping => "scraping",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Active runs block a query from being started again.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Pending | RunStatus::Discovering | RunStatus::Scraping
        )
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        match (self, to) {
            (Pending, Discovering) => true,
            (Discovering, Scraping) => true,
            (Scraping, Completed) | (Scraping, Failed) => true,
            (Pending, Failed) | (Discovering, Failed) => true,
            // Explicit stop from any active state.
            (from, Stopped) if from.is_active() => true,
            // Resume re-enters the scraping phase; a retried discovery
            // task re-opens discovery.
            (Stopped, Scraping) | (Failed, Scraping) | (Failed, Discovering) => true,
            _ => false,
        }
    }

    pub const ACTIVE: &'static [RunStatus] =
        &[RunStatus::Pending, RunStatus::Discovering, RunStatus::Scraping];
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "discovering" => Ok(RunStatus::Discovering),
            "scraping" => Ok(RunStatus::Scraping),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Kind of a scrape task: discover one result page, or fetch one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Discovery,
    ListingFetch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Discovery => "discovery",
            TaskKind::ListingFetch => "listing-fetch",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discovery" => Ok(TaskKind::Discovery),
            "listing-fetch" => Ok(TaskKind::ListingFetch),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

/// Status of an individual background task.
///
/// A failed task is never resurrected in place: retry deletes the row and
/// dispatches a fresh task with the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Running, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Status of a discovered listing awaiting its detail fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveredStatus {
    Pending,
    Queued,
    Scraped,
    Failed,
    Skipped,
}

impl DiscoveredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveredStatus::Pending => "pending",
            DiscoveredStatus::Queued => "queued",
            DiscoveredStatus::Scraped => "scraped",
            DiscoveredStatus::Failed => "failed",
            DiscoveredStatus::Skipped => "skipped",
        }
    }

    pub fn can_transition_to(&self, to: DiscoveredStatus) -> bool {
        use DiscoveredStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Skipped)
                | (Queued, Scraped)
                | (Queued, Failed)
                | (Queued, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for DiscoveredStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiscoveredStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DiscoveredStatus::Pending),
            "queued" => Ok(DiscoveredStatus::Queued),
            "scraped" => Ok(DiscoveredStatus::Scraped),
            "failed" => Ok(DiscoveredStatus::Failed),
            "skipped" => Ok(DiscoveredStatus::Skipped),
            _ => Err(format!("Unknown discovered-listing status: {}", s)),
        }
    }
}

/// Deduplication lifecycle of a scraped listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Pending,
    Processing,
    Waiting,
    Grouped,
    Unique,
    Completed,
    Failed,
    Cancelled,
}

impl DedupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupStatus::Pending => "pending",
            DedupStatus::Processing => "processing",
            DedupStatus::Waiting => "waiting",
            DedupStatus::Grouped => "grouped",
            DedupStatus::Unique => "unique",
            DedupStatus::Completed => "completed",
            DedupStatus::Failed => "failed",
            DedupStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, to: DedupStatus) -> bool {
        use DedupStatus::*;
        match (self, to) {
            (Pending, Processing) | (Pending, Cancelled) => true,
            (Processing, Waiting)
            | (Processing, Grouped)
            | (Processing, Unique)
            | (Processing, Failed)
            // Stale recovery and cancellation hand the row back.
            | (Processing, Pending)
            | (Processing, Cancelled) => true,
            (Waiting, Grouped) | (Waiting, Pending) | (Waiting, Cancelled) => true,
            // Group rejection or member removal returns the listing to the pool.
            (Grouped, Pending) | (Grouped, Completed) | (Grouped, Failed) => true,
            (Unique, Completed) | (Unique, Failed) | (Unique, Pending) => true,
            (Failed, Pending) | (Cancelled, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DedupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DedupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DedupStatus::Pending),
            "processing" => Ok(DedupStatus::Processing),
            "waiting" => Ok(DedupStatus::Waiting),
            "grouped" => Ok(DedupStatus::Grouped),
            "unique" => Ok(DedupStatus::Unique),
            "completed" => Ok(DedupStatus::Completed),
            "failed" => Ok(DedupStatus::Failed),
            "cancelled" => Ok(DedupStatus::Cancelled),
            _ => Err(format!("Unknown dedup status: {}", s)),
        }
    }
}

/// Outcome of a single pairwise comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    ConfirmedMatch,
    ConfirmedDifferent,
    NeedsReview,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::ConfirmedMatch => "confirmed_match",
            CandidateStatus::ConfirmedDifferent => "confirmed_different",
            CandidateStatus::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CandidateStatus::Pending),
            "confirmed_match" => Ok(CandidateStatus::ConfirmedMatch),
            "confirmed_different" => Ok(CandidateStatus::ConfirmedDifferent),
            "needs_review" => Ok(CandidateStatus::NeedsReview),
            _ => Err(format!("Unknown candidate status: {}", s)),
        }
    }
}

/// Review/synthesis lifecycle of a listing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    PendingReview,
    PendingAi,
    ProcessingAi,
    Completed,
    Rejected,
    Failed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::PendingReview => "pending_review",
            GroupStatus::PendingAi => "pending_ai",
            GroupStatus::ProcessingAi => "processing_ai",
            GroupStatus::Completed => "completed",
            GroupStatus::Rejected => "rejected",
            GroupStatus::Failed => "failed",
        }
    }

    /// Groups in these states still own their member listings.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            GroupStatus::PendingReview | GroupStatus::PendingAi | GroupStatus::ProcessingAi
        )
    }

    pub fn can_transition_to(&self, to: GroupStatus) -> bool {
        use GroupStatus::*;
        matches!(
            (self, to),
            (PendingReview, PendingAi)
                | (PendingReview, Rejected)
                | (PendingAi, ProcessingAi)
                | (PendingAi, Rejected)
                | (ProcessingAi, Completed)
                | (ProcessingAi, Failed)
                | (ProcessingAi, Rejected)
                // Stale recovery returns a stuck group to the synthesis queue.
                | (ProcessingAi, PendingAi)
                | (Failed, PendingAi)
        )
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending_review" => Ok(GroupStatus::PendingReview),
            "pending_ai" => Ok(GroupStatus::PendingAi),
            "processing_ai" => Ok(GroupStatus::ProcessingAi),
            "completed" => Ok(GroupStatus::Completed),
            "rejected" => Ok(GroupStatus::Rejected),
            "failed" => Ok(GroupStatus::Failed),
            _ => Err(format!("Unknown group status: {}", s)),
        }
    }
}

/// Recurring schedule for an auto-run search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl RunFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunFrequency::Hourly => "hourly",
            RunFrequency::Daily => "daily",
            RunFrequency::Weekly => "weekly",
            RunFrequency::Monthly => "monthly",
        }
    }

    /// Fixed minute offset applied to `next_run_at` after a run.
    pub fn minutes(&self) -> i64 {
        match self {
            RunFrequency::Hourly => 60,
            RunFrequency::Daily => 60 * 24,
            RunFrequency::Weekly => 60 * 24 * 7,
            RunFrequency::Monthly => 60 * 24 * 30,
        }
    }
}

impl fmt::Display for RunFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(RunFrequency::Hourly),
            "daily" => Ok(RunFrequency::Daily),
            "weekly" => Ok(RunFrequency::Weekly),
            "monthly" => Ok(RunFrequency::Monthly),
            _ => Err(format!("Unknown run frequency: {}", s)),
        }
    }
}

/// Display banding for match confidence.
///
/// These thresholds are the banding contract for review surfaces, not the
/// scorer's internal decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceBand::High
        } else if score >= 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}
