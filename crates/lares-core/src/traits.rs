//! Capability traits for the external collaborators.
//!
//! The fetch and synthesis services are consumed over narrow
//! request/response contracts so the core never depends on their
//! implementation, and tests can substitute deterministic doubles.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ListingPayload;

/// One page of search results from the fetch collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPage {
    pub total_results: u64,
    pub total_pages: u32,
    pub listings: Vec<DiscoveredItem>,
}

/// A single listing reference on a result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredItem {
    pub url: String,
    pub external_id: String,
}

/// Health report from the fetch collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub ready: bool,
}

/// Browser-automation fetch service.
pub trait Fetcher: Send + Sync + Clone {
    /// Fetch one page of a search result.
    fn discover(
        &self,
        url: &str,
        page: u32,
    ) -> impl Future<Output = Result<DiscoveryPage, AppError>> + Send;

    /// Fetch one listing's full detail.
    fn scrape(&self, url: &str) -> impl Future<Output = Result<ListingPayload, AppError>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthStatus, AppError>> + Send;
}

/// Successful synthesis result: canonical property attributes plus a
/// quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    pub attributes: serde_json::Value,
    pub quality_score: f64,
}

/// AI synthesis service. Failure with a human-readable reason surfaces as
/// [`AppError::SynthesisRejected`].
pub trait Synthesizer: Send + Sync + Clone {
    fn synthesize(
        &self,
        group_id: Uuid,
        listings: &[ListingPayload],
    ) -> impl Future<Output = Result<SynthesisOutcome, AppError>> + Send;
}

/// Pluggable pairwise matching strategy.
///
/// Returns a confidence in [0,1] that the two payloads describe the same
/// property. The banding thresholds (0.8 / 0.6) are a display contract,
/// not necessarily this function's internals.
pub trait MatchScorer: Send + Sync + Clone {
    fn score(&self, a: &ListingPayload, b: &ListingPayload) -> f64;
}
