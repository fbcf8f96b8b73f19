use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{
    DedupCandidate, ListingGroup, NewDedupCandidate, NewListingGroup, NewProperty, Property,
};
use lares_core::status::{CandidateStatus, GroupStatus};
use lares_core::store::GroupStore;

/// PostgreSQL-backed listing groups, pairwise candidates, and canonical
/// properties.
#[derive(Clone)]
pub struct GroupRepository {
    pool: Pool<Postgres>,
}

impl GroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    status: String,
    match_score: Option<f64>,
    matched_property_id: Option<Uuid>,
    rejection_reason: Option<String>,
    quality_score: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GroupRow> for ListingGroup {
    fn from(row: GroupRow) -> Self {
        ListingGroup {
            id: row.id,
            status: row.status.parse().unwrap_or(GroupStatus::PendingReview),
            match_score: row.match_score,
            matched_property_id: row.matched_property_id,
            rejection_reason: row.rejection_reason,
            quality_score: row.quality_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    listing_id: Uuid,
    other_listing_id: Option<Uuid>,
    property_id: Option<Uuid>,
    score: f64,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<CandidateRow> for DedupCandidate {
    fn from(row: CandidateRow) -> Self {
        DedupCandidate {
            id: row.id,
            listing_id: row.listing_id,
            other_listing_id: row.other_listing_id,
            property_id: row.property_id,
            score: row.score,
            status: row.status.parse().unwrap_or(CandidateStatus::Pending),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PropertyRow {
    id: Uuid,
    attributes: serde_json::Value,
    quality_score: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PropertyRow> for Property {
    fn from(row: PropertyRow) -> Self {
        Property {
            id: row.id,
            attributes: row.attributes,
            quality_score: row.quality_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn status_strings(statuses: &[GroupStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

const OPEN_STATUSES: &[GroupStatus] = &[
    GroupStatus::PendingReview,
    GroupStatus::PendingAi,
    GroupStatus::ProcessingAi,
];

impl GroupStore for GroupRepository {
    async fn insert_group(
        &self,
        group: NewListingGroup,
        members: &[Uuid],
    ) -> Result<ListingGroup, AppError> {
        // Group and membership rows land together or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let row = sqlx::query_as::<_, GroupRow>(
            r#"
            INSERT INTO listing_groups (match_score, matched_property_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(group.match_score)
        .bind(group.matched_property_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for listing_id in members {
            sqlx::query(
                r#"INSERT INTO listing_group_members (group_id, listing_id) VALUES ($1, $2)"#,
            )
            .bind(row.id)
            .bind(listing_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<ListingGroup>, AppError> {
        let row = sqlx::query_as::<_, GroupRow>(r#"SELECT * FROM listing_groups WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT listing_id FROM listing_group_members
            WHERE group_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn active_group_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Option<ListingGroup>, AppError> {
        let row = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT g.* FROM listing_groups g
            JOIN listing_group_members m ON m.group_id = g.id
            WHERE m.listing_id = $1 AND g.status = ANY($2)
            LIMIT 1
            "#,
        )
        .bind(listing_id)
        .bind(status_strings(OPEN_STATUSES))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn add_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO listing_group_members (group_id, listing_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(listing_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn remove_member(&self, group_id: Uuid, listing_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"DELETE FROM listing_group_members WHERE group_id = $1 AND listing_id = $2"#,
        )
        .bind(group_id)
        .bind(listing_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_group(
        &self,
        id: Uuid,
        from: &[GroupStatus],
        to: GroupStatus,
        reason: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listing_groups
            SET status = $3,
                rejection_reason = COALESCE($4, rejection_reason),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(status_strings(from))
        .bind(to.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_group_quality(&self, id: Uuid, quality_score: f64) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE listing_groups SET quality_score = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .bind(quality_score)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("group", id));
        }
        Ok(())
    }

    async fn pending_review(&self, limit: usize) -> Result<Vec<ListingGroup>, AppError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT * FROM listing_groups
            WHERE status = 'pending_review'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn groups_by_status(
        &self,
        statuses: &[GroupStatus],
    ) -> Result<Vec<ListingGroup>, AppError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT * FROM listing_groups
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(status_strings(statuses))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reset_stale_groups(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listing_groups
            SET status = 'pending_ai', updated_at = NOW()
            WHERE status = 'processing_ai' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_groups(&self, status: GroupStatus) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM listing_groups WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as u64)
    }

    async fn insert_candidates(&self, candidates: &[NewDedupCandidate]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for c in candidates {
            sqlx::query(
                r#"
                INSERT INTO dedup_candidates
                    (listing_id, other_listing_id, property_id, score, status)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(c.listing_id)
            .bind(c.other_listing_id)
            .bind(c.property_id)
            .bind(c.score)
            .bind(c.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn candidates_for_listing(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<DedupCandidate>, AppError> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT * FROM dedup_candidates
            WHERE listing_id = $1
            ORDER BY score DESC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_property(&self, property: NewProperty) -> Result<Property, AppError> {
        let row = sqlx::query_as::<_, PropertyRow>(
            r#"
            INSERT INTO properties (attributes, quality_score)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(&property.attributes)
        .bind(property.quality_score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_property(&self, id: Uuid) -> Result<Option<Property>, AppError> {
        let row = sqlx::query_as::<_, PropertyRow>(r#"SELECT * FROM properties WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn update_property(
        &self,
        id: Uuid,
        attributes: serde_json::Value,
        quality_score: Option<f64>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE properties
            SET attributes = $2,
                quality_score = COALESCE($3, quality_score),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&attributes)
        .bind(quality_score)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("property", id));
        }
        Ok(())
    }

    async fn list_properties(&self) -> Result<Vec<Property>, AppError> {
        let rows = sqlx::query_as::<_, PropertyRow>(
            r#"SELECT * FROM properties ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
