//! Synthesis gate: turns approved listing groups into canonical
//! properties through the AI synthesis collaborator.
//!
//! Only groups a reviewer approved (`PendingAi`) are eligible. A group is
//! claimed with a conditional transition to `ProcessingAi`; losing that
//! race means another worker has it and the group is skipped.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{BatchReport, NewProperty};
use crate::status::GroupStatus;
use crate::store::{CatalogStore, GroupStore, ListingStore};
use crate::traits::Synthesizer;

/// Result of one group passing through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisResult {
    /// The group was not claimable (not `PendingAi`, or contended).
    Skipped,
    /// Synthesis succeeded; members now link to this property.
    Completed { property_id: Uuid },
}

#[derive(Clone)]
pub struct SynthesisGate<S, Y> {
    store: S,
    synthesizer: Y,
}

impl<S, Y> SynthesisGate<S, Y>
where
    S: ListingStore + GroupStore + CatalogStore,
    Y: Synthesizer,
{
    pub fn new(store: S, synthesizer: Y) -> Self {
        Self { store, synthesizer }
    }

    /// Run one approved group through synthesis.
    ///
    /// On success the canonical property is created (or merged into the
    /// group's matched property), every member listing is linked to it,
    /// and the group completes with the reported quality score. On
    /// rejection the group moves to `Failed` with the reason and its
    /// members keep their `Grouped` status for a later retry.
    pub async fn process_group(&self, group_id: Uuid) -> Result<SynthesisResult, AppError> {
        let flags = self.store.feature_flags().await?;
        if !flags.synthesis_enabled {
            return Err(AppError::FeatureDisabled("synthesis"));
        }

        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("group", group_id))?;

        if !self
            .store
            .transition_group(
                group_id,
                &[GroupStatus::PendingAi],
                GroupStatus::ProcessingAi,
                None,
            )
            .await?
        {
            return Ok(SynthesisResult::Skipped);
        }

        match self.synthesize_claimed(&group).await {
            Ok(property_id) => Ok(SynthesisResult::Completed { property_id }),
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .transition_group(
                        group_id,
                        &[GroupStatus::ProcessingAi],
                        GroupStatus::Failed,
                        Some(&reason),
                    )
                    .await?;
                tracing::warn!(%group_id, error = %reason, "Synthesis failed for group");
                Err(e)
            }
        }
    }

    async fn synthesize_claimed(
        &self,
        group: &crate::models::ListingGroup,
    ) -> Result<Uuid, AppError> {
        let members = self.store.group_members(group.id).await?;
        let listings = self.store.listings_by_ids(&members).await?;
        let payloads: Vec<_> = listings.iter().filter_map(|l| l.payload.clone()).collect();
        if payloads.is_empty() {
            return Err(AppError::Generic(
                "group has no member with extracted data".into(),
            ));
        }

        let outcome = self.synthesizer.synthesize(group.id, &payloads).await?;

        let property_id = match group.matched_property_id {
            Some(id) => {
                // Approved against an existing property: merge, don't fork.
                self.store
                    .update_property(id, outcome.attributes, Some(outcome.quality_score))
                    .await?;
                id
            }
            None => {
                self.store
                    .insert_property(NewProperty {
                        attributes: outcome.attributes,
                        quality_score: Some(outcome.quality_score),
                    })
                    .await?
                    .id
            }
        };

        for listing_id in &members {
            self.store
                .set_listing_property(*listing_id, property_id)
                .await?;
        }

        self.store
            .transition_group(
                group.id,
                &[GroupStatus::ProcessingAi],
                GroupStatus::Completed,
                None,
            )
            .await?;
        self.store
            .set_group_quality(group.id, outcome.quality_score)
            .await?;

        tracing::info!(
            group_id = %group.id,
            %property_id,
            quality = outcome.quality_score,
            members = members.len(),
            "Group synthesized into property"
        );
        Ok(property_id)
    }

    /// Drain up to `limit` approved groups. Per-group failures are tallied
    /// and never abort the sweep.
    pub async fn process_pending(&self, limit: usize) -> Result<BatchReport, AppError> {
        let flags = self.store.feature_flags().await?;
        if !flags.synthesis_enabled {
            return Err(AppError::FeatureDisabled("synthesis"));
        }

        let mut report = BatchReport::default();
        let groups = self.store.groups_by_status(&[GroupStatus::PendingAi]).await?;
        for group in groups.into_iter().take(limit) {
            match self.process_group(group.id).await {
                Ok(SynthesisResult::Completed { .. }) => report.processed += 1,
                Ok(SynthesisResult::Skipped) => {}
                Err(e) => {
                    tracing::warn!(group_id = %group.id, error = %e, "Skipping failed group");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Put a failed group back in the synthesis queue.
    pub async fn retry_group(&self, group_id: Uuid) -> Result<(), AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("group", group_id))?;

        if !self
            .store
            .transition_group(
                group_id,
                &[GroupStatus::Failed],
                GroupStatus::PendingAi,
                None,
            )
            .await?
        {
            return Err(AppError::conflict(
                "group",
                group_id,
                GroupStatus::Failed,
                group.status,
            ));
        }
        tracing::info!(%group_id, "Group re-queued for synthesis");
        Ok(())
    }
}
