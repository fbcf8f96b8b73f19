//! Deduplication and grouping: matches freshly scraped listings against
//! each other and against existing canonical properties, forms review
//! groups, and exposes the approve/reject review workflow.
//!
//! The listing's `dedup_status` is the only lock: a listing enters
//! `Processing` through a conditional transition, and any contention is
//! treated as "someone else has it, skip".

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    BatchReport, Listing, ListingGroup, ListingPayload, NewDedupCandidate, NewListingGroup,
};
use crate::status::{CandidateStatus, DedupStatus, GroupStatus};
use crate::store::{CatalogStore, GroupStore, ListingStore};
use crate::traits::MatchScorer;

/// Thresholds for candidate classification and group formation.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    /// Minimum score for a pair to be recorded and routed to review.
    pub review_threshold: f64,
    /// Score at or above which a pair is recorded as a confirmed match.
    pub confirm_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.6,
            confirm_threshold: 0.95,
        }
    }
}

/// How one listing was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Guarded no-op: already processing, already linked to a property,
    /// or nothing identifiable to compare on.
    Skipped,
    /// A new group was formed with another pending listing.
    Grouped { group_id: Uuid },
    /// Attached to an existing open group.
    JoinedGroup { group_id: Uuid },
    /// Matched an existing canonical property (1-vs-property group).
    MatchedProperty { group_id: Uuid, property_id: Uuid },
    /// Best match was contended by another worker; parked for a later pass.
    Deferred,
    /// No match above threshold; the listing stands alone.
    Unique,
}

/// Matching and review engine.
#[derive(Clone)]
pub struct DedupEngine<S, M> {
    store: S,
    scorer: M,
    config: DedupConfig,
}

impl<S, M> DedupEngine<S, M>
where
    S: ListingStore + GroupStore + CatalogStore,
    M: MatchScorer,
{
    pub fn new(store: S, scorer: M) -> Self {
        Self {
            store,
            scorer,
            config: DedupConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DedupConfig) -> Self {
        self.config = config;
        self
    }

    /// Process one listing through matching. Guarded: a listing that is
    /// already `Processing`, already linked to a property, or carries no
    /// identity signal is skipped untouched.
    pub async fn process_listing(&self, listing_id: Uuid) -> Result<DedupOutcome, AppError> {
        let flags = self.store.feature_flags().await?;
        if !flags.dedup_enabled {
            return Err(AppError::FeatureDisabled("dedup"));
        }

        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| AppError::not_found("listing", listing_id))?;

        if listing.property_id.is_some() || listing.dedup_status == DedupStatus::Processing {
            return Ok(DedupOutcome::Skipped);
        }
        if !listing.has_identity_signal() {
            return Ok(DedupOutcome::Skipped);
        }

        if !self
            .store
            .transition_dedup(listing.id, &[DedupStatus::Pending], DedupStatus::Processing)
            .await?
        {
            return Ok(DedupOutcome::Skipped);
        }

        match self.resolve(&listing).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.store
                    .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }

    async fn resolve(&self, listing: &Listing) -> Result<DedupOutcome, AppError> {
        let Some(payload) = &listing.payload else {
            // Nothing to compare on; hand the row back untouched.
            self.store
                .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Pending)
                .await?;
            return Ok(DedupOutcome::Skipped);
        };

        let mut candidates: Vec<NewDedupCandidate> = Vec::new();

        // Against existing canonical properties first: merging into an
        // existing property beats forming a new cluster.
        let mut best_property: Option<(Uuid, f64)> = None;
        for property in self.store.list_properties().await? {
            let Ok(other) = serde_json::from_value::<ListingPayload>(property.attributes.clone())
            else {
                continue;
            };
            let score = self.scorer.score(payload, &other);
            if score >= self.config.review_threshold {
                candidates.push(NewDedupCandidate {
                    listing_id: listing.id,
                    other_listing_id: None,
                    property_id: Some(property.id),
                    score,
                    status: self.classify(score),
                });
                if best_property.is_none_or(|(_, s)| score > s) {
                    best_property = Some((property.id, score));
                }
            }
        }

        // Against the pool of other unlinked listings.
        let mut best_listing: Option<(Listing, f64)> = None;
        for other in self.store.match_pool(listing.id).await? {
            let Some(other_payload) = &other.payload else {
                continue;
            };
            let score = self.scorer.score(payload, other_payload);
            if score >= self.config.review_threshold {
                candidates.push(NewDedupCandidate {
                    listing_id: listing.id,
                    other_listing_id: Some(other.id),
                    property_id: None,
                    score,
                    status: self.classify(score),
                });
                if best_listing.as_ref().is_none_or(|(_, s)| score > *s) {
                    best_listing = Some((other.clone(), score));
                }
            }
        }

        if !candidates.is_empty() {
            self.store.insert_candidates(&candidates).await?;
        }

        if let Some((property_id, score)) = best_property {
            let group = self
                .store
                .insert_group(
                    NewListingGroup {
                        match_score: Some(score),
                        matched_property_id: Some(property_id),
                    },
                    &[listing.id],
                )
                .await?;
            self.store
                .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Grouped)
                .await?;
            tracing::info!(
                listing_id = %listing.id,
                %property_id,
                group_id = %group.id,
                %score,
                "Listing matched existing property"
            );
            return Ok(DedupOutcome::MatchedProperty {
                group_id: group.id,
                property_id,
            });
        }

        if let Some((other, score)) = best_listing {
            return self.group_with(listing, &other, score).await;
        }

        self.store
            .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Unique)
            .await?;
        Ok(DedupOutcome::Unique)
    }

    async fn group_with(
        &self,
        listing: &Listing,
        other: &Listing,
        score: f64,
    ) -> Result<DedupOutcome, AppError> {
        // The matched listing may already sit in an open group; join it.
        if let Some(group) = self.store.active_group_for_listing(other.id).await? {
            self.store.add_member(group.id, listing.id).await?;
            self.store
                .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Grouped)
                .await?;
            tracing::info!(
                listing_id = %listing.id,
                group_id = %group.id,
                %score,
                "Listing joined existing group"
            );
            return Ok(DedupOutcome::JoinedGroup { group_id: group.id });
        }

        // Pull the partner into the new group. Losing this transition means
        // another worker holds it; park ourselves instead of fighting.
        if !self
            .store
            .transition_dedup(
                other.id,
                &[DedupStatus::Pending, DedupStatus::Waiting, DedupStatus::Unique],
                DedupStatus::Grouped,
            )
            .await?
        {
            self.store
                .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Waiting)
                .await?;
            return Ok(DedupOutcome::Deferred);
        }

        let group = self
            .store
            .insert_group(
                NewListingGroup {
                    match_score: Some(score),
                    matched_property_id: None,
                },
                &[listing.id, other.id],
            )
            .await?;
        self.store
            .transition_dedup(listing.id, &[DedupStatus::Processing], DedupStatus::Grouped)
            .await?;
        tracing::info!(
            listing_id = %listing.id,
            other_id = %other.id,
            group_id = %group.id,
            %score,
            "New listing group formed"
        );
        Ok(DedupOutcome::Grouped { group_id: group.id })
    }

    fn classify(&self, score: f64) -> CandidateStatus {
        if score >= self.config.confirm_threshold {
            CandidateStatus::ConfirmedMatch
        } else {
            CandidateStatus::NeedsReview
        }
    }

    /// Process up to `batch` pending listings with extracted data.
    /// Listings without an identity signal are left untouched and not
    /// counted. Per-item failures are tallied in the report and never
    /// abort the batch. Callers loop until a batch touches fewer than
    /// `batch` rows (exhaustion) or their own limit is hit.
    pub async fn process_unlinked_listings(&self, batch: usize) -> Result<BatchReport, AppError> {
        let flags = self.store.feature_flags().await?;
        if !flags.dedup_enabled {
            return Err(AppError::FeatureDisabled("dedup"));
        }

        let rows = self.store.select_dedup_pending(batch).await?;
        let mut report = BatchReport::default();
        for row in rows {
            match self.process_listing(row.id).await {
                Ok(DedupOutcome::Skipped) => {}
                Ok(_) => report.processed += 1,
                Err(e) => {
                    tracing::warn!(listing_id = %row.id, error = %e, "Dedup failed for listing");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // -- review workflow ----------------------------------------------------

    /// Groups awaiting human review, oldest first.
    pub async fn pending_review(&self, limit: usize) -> Result<Vec<ListingGroup>, AppError> {
        self.store.pending_review(limit).await
    }

    /// Confirm a grouping: the group moves to `PendingAi` for synthesis.
    /// Member listings keep their `Grouped` status until synthesis
    /// completes.
    pub async fn approve_group(&self, group_id: Uuid) -> Result<(), AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("group", group_id))?;

        if !self
            .store
            .transition_group(
                group_id,
                &[GroupStatus::PendingReview],
                GroupStatus::PendingAi,
                None,
            )
            .await?
        {
            return Err(AppError::conflict(
                "group",
                group_id,
                GroupStatus::PendingReview,
                group.status,
            ));
        }
        tracing::info!(%group_id, "Group approved for synthesis");
        Ok(())
    }

    /// Reject a grouping: members detach and return to independent dedup
    /// processing. Returns the number of listings detached.
    pub async fn reject_group(
        &self,
        group_id: Uuid,
        reason: Option<&str>,
    ) -> Result<u64, AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("group", group_id))?;

        if !self
            .store
            .transition_group(
                group_id,
                &[GroupStatus::PendingReview],
                GroupStatus::Rejected,
                reason,
            )
            .await?
        {
            return Err(AppError::conflict(
                "group",
                group_id,
                GroupStatus::PendingReview,
                group.status,
            ));
        }

        let members = self.store.group_members(group_id).await?;
        let mut detached = 0;
        for listing_id in members {
            self.store.remove_member(group_id, listing_id).await?;
            self.store
                .transition_dedup(
                    listing_id,
                    &[DedupStatus::Grouped, DedupStatus::Waiting],
                    DedupStatus::Pending,
                )
                .await?;
            detached += 1;
        }
        tracing::info!(%group_id, %detached, ?reason, "Group rejected");
        Ok(detached)
    }

    /// Detach one listing from a multi-member group, returning it to
    /// independent dedup processing. The rest of the group stays intact.
    pub async fn remove_listing_from_group(
        &self,
        group_id: Uuid,
        listing_id: Uuid,
    ) -> Result<(), AppError> {
        if self.store.get_group(group_id).await?.is_none() {
            return Err(AppError::not_found("group", group_id));
        }
        let members = self.store.group_members(group_id).await?;
        if members.len() <= 1 {
            return Err(AppError::conflict(
                "group",
                group_id,
                "more than one member",
                members.len(),
            ));
        }
        if !self.store.remove_member(group_id, listing_id).await? {
            return Err(AppError::not_found("listing in group", listing_id));
        }
        self.store
            .transition_dedup(listing_id, &[DedupStatus::Grouped], DedupStatus::Pending)
            .await?;
        tracing::info!(%group_id, %listing_id, "Listing removed from group");
        Ok(())
    }
}
