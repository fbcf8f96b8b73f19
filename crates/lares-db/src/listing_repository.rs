use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use lares_core::error::AppError;
use lares_core::models::{
    DiscoveredListing, GeocodeStatus, Listing, ListingPayload, NewDiscoveredListing, NewListing,
};
use lares_core::status::{DedupStatus, DiscoveredStatus};
use lares_core::store::ListingStore;

/// PostgreSQL-backed discovered and scraped listings.
#[derive(Clone)]
pub struct ListingRepository {
    pool: Pool<Postgres>,
}

impl ListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DiscoveredRow {
    id: Uuid,
    platform_id: Uuid,
    run_id: Uuid,
    external_id: String,
    url: String,
    status: String,
    priority: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DiscoveredRow> for DiscoveredListing {
    fn from(row: DiscoveredRow) -> Self {
        DiscoveredListing {
            id: row.id,
            platform_id: row.platform_id,
            run_id: row.run_id,
            external_id: row.external_id,
            url: row.url,
            status: row.status.parse().unwrap_or(DiscoveredStatus::Pending),
            priority: row.priority,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    platform_id: Uuid,
    discovered_id: Option<Uuid>,
    run_id: Option<Uuid>,
    external_id: Option<String>,
    url: String,
    payload: Option<serde_json::Value>,
    dedup_status: String,
    geocode_status: String,
    property_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    fn try_from(row: ListingRow) -> Result<Self, AppError> {
        let payload: Option<ListingPayload> =
            row.payload.map(serde_json::from_value).transpose()?;
        Ok(Listing {
            id: row.id,
            platform_id: row.platform_id,
            discovered_id: row.discovered_id,
            run_id: row.run_id,
            external_id: row.external_id,
            url: row.url,
            payload,
            dedup_status: row.dedup_status.parse().unwrap_or(DedupStatus::Pending),
            geocode_status: match row.geocode_status.as_str() {
                "done" => GeocodeStatus::Done,
                "failed" => GeocodeStatus::Failed,
                _ => GeocodeStatus::Pending,
            },
            property_id: row.property_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect(rows: Vec<ListingRow>) -> Result<Vec<Listing>, AppError> {
    rows.into_iter().map(TryInto::try_into).collect()
}

fn dedup_strings(statuses: &[DedupStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

impl ListingStore for ListingRepository {
    async fn insert_discovered(
        &self,
        listing: NewDiscoveredListing,
    ) -> Result<DiscoveredListing, AppError> {
        // A page re-listing the same external id within a run returns the
        // existing row untouched.
        let row = sqlx::query_as::<_, DiscoveredRow>(
            r#"
            INSERT INTO discovered_listings (platform_id, run_id, external_id, url, priority)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id, external_id) DO UPDATE SET external_id = EXCLUDED.external_id
            RETURNING *
            "#,
        )
        .bind(listing.platform_id)
        .bind(listing.run_id)
        .bind(&listing.external_id)
        .bind(&listing.url)
        .bind(listing.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_discovered(&self, id: Uuid) -> Result<Option<DiscoveredListing>, AppError> {
        let row =
            sqlx::query_as::<_, DiscoveredRow>(r#"SELECT * FROM discovered_listings WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn select_pending_discovered(
        &self,
        platform_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DiscoveredListing>, AppError> {
        let rows = sqlx::query_as::<_, DiscoveredRow>(
            r#"
            SELECT * FROM discovered_listings
            WHERE status = 'pending'
              AND ($1::uuid IS NULL OR platform_id = $1)
            ORDER BY priority DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(platform_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn resumable_discovered(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<DiscoveredListing>, AppError> {
        let rows = sqlx::query_as::<_, DiscoveredRow>(
            r#"
            SELECT * FROM discovered_listings
            WHERE run_id = $1 AND status IN ('pending', 'queued')
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transition_discovered(
        &self,
        id: Uuid,
        from: &[DiscoveredStatus],
        to: DiscoveredStatus,
        error: Option<&str>,
    ) -> Result<bool, AppError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE discovered_listings
            SET status = $3,
                error_message = COALESCE($4, error_message),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_discovered(
        &self,
        run_id: Option<Uuid>,
        status: DiscoveredStatus,
    ) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM discovered_listings
            WHERE ($1::uuid IS NULL OR run_id = $1) AND status = $2
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as u64)
    }

    async fn upsert_listing(&self, listing: NewListing) -> Result<Listing, AppError> {
        let payload = listing
            .payload
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        // Re-scrapes match on platform + external id when present, else on
        // url. A listing already linked to a property keeps its dedup
        // status; an unlinked one re-enters the dedup queue.
        let updated = sqlx::query_as::<_, ListingRow>(
            r#"
            UPDATE listings
            SET payload = $4,
                discovered_id = COALESCE($5, discovered_id),
                run_id = COALESCE($6, run_id),
                dedup_status = CASE WHEN property_id IS NULL
                               THEN 'pending' ELSE dedup_status END,
                updated_at = NOW()
            WHERE platform_id = $1
              AND CASE WHEN $2::text IS NOT NULL
                  THEN external_id = $2
                  ELSE external_id IS NULL AND url = $3 END
            RETURNING *
            "#,
        )
        .bind(listing.platform_id)
        .bind(&listing.external_id)
        .bind(&listing.url)
        .bind(&payload)
        .bind(listing.discovered_id)
        .bind(listing.run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if let Some(row) = updated {
            return row.try_into();
        }

        let row = sqlx::query_as::<_, ListingRow>(
            r#"
            INSERT INTO listings (platform_id, discovered_id, run_id, external_id, url, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(listing.platform_id)
        .bind(listing.discovered_id)
        .bind(listing.run_id)
        .bind(&listing.external_id)
        .bind(&listing.url)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, AppError> {
        let row = sqlx::query_as::<_, ListingRow>(r#"SELECT * FROM listings WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn listings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Listing>, AppError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"SELECT * FROM listings WHERE id = ANY($1) ORDER BY created_at ASC"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        collect(rows)
    }

    async fn select_dedup_pending(&self, limit: usize) -> Result<Vec<Listing>, AppError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT * FROM listings
            WHERE dedup_status = 'pending'
              AND payload IS NOT NULL
              AND property_id IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        collect(rows)
    }

    async fn match_pool(&self, exclude: Uuid) -> Result<Vec<Listing>, AppError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT * FROM listings
            WHERE id <> $1
              AND payload IS NOT NULL
              AND property_id IS NULL
              AND dedup_status = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(exclude)
        .bind(dedup_strings(&[
            DedupStatus::Pending,
            DedupStatus::Waiting,
            DedupStatus::Grouped,
        ]))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        collect(rows)
    }

    async fn transition_dedup(
        &self,
        id: Uuid,
        from: &[DedupStatus],
        to: DedupStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET dedup_status = $3, updated_at = NOW()
            WHERE id = $1 AND dedup_status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(dedup_strings(from))
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_listing_property(&self, id: Uuid, property_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET property_id = $2, dedup_status = 'completed', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(property_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("listing", id));
        }
        Ok(())
    }

    async fn reset_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET dedup_status = 'pending', updated_at = NOW()
            WHERE dedup_status IN ('processing', 'waiting') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_dedup(&self, status: DedupStatus) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM listings WHERE dedup_status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as u64)
    }
}
