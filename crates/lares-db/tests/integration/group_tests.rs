use lares_core::models::{
    ListingPayload, NewDedupCandidate, NewListing, NewListingGroup, NewProperty,
};
use lares_core::status::{CandidateStatus, GroupStatus};
use lares_core::store::{GroupStore, ListingStore};
use lares_db::{GroupRepository, ListingRepository};
use uuid::Uuid;

use crate::common::{seed_platform_and_query, setup_test_db};

async fn seed_listing(pool: &sqlx::PgPool, external_id: &str) -> Uuid {
    let existing =
        sqlx::query_as::<_, (Uuid,)>(r#"SELECT id FROM platforms WHERE slug = 'portal-test'"#)
            .fetch_optional(pool)
            .await
            .unwrap();
    let platform_id = match existing {
        Some((id,)) => id,
        None => seed_platform_and_query(pool).await.0,
    };

    ListingRepository::new(pool.clone())
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: None,
            external_id: Some(external_id.into()),
            url: format!("https://portal.test/l/{external_id}"),
            payload: Some(ListingPayload {
                title: Some(format!("Listing {external_id}")),
                ..Default::default()
            }),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn insert_group_creates_memberships_atomically() {
    let (pool, _container) = setup_test_db().await;
    let a = seed_listing(&pool, "a").await;
    let b = seed_listing(&pool, "b").await;
    let repo = GroupRepository::new(pool);

    let group = repo
        .insert_group(
            NewListingGroup {
                match_score: Some(0.82),
                matched_property_id: None,
            },
            &[a, b],
        )
        .await
        .unwrap();

    assert_eq!(group.status, GroupStatus::PendingReview);
    assert_eq!(group.match_score, Some(0.82));

    let members = repo.group_members(group.id).await.unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&a) && members.contains(&b));
}

#[tokio::test]
async fn active_group_ignores_closed_groups() {
    let (pool, _container) = setup_test_db().await;
    let a = seed_listing(&pool, "a").await;
    let repo = GroupRepository::new(pool);

    let group = repo
        .insert_group(NewListingGroup::default(), &[a])
        .await
        .unwrap();
    assert!(repo.active_group_for_listing(a).await.unwrap().is_some());

    repo.transition_group(
        group.id,
        &[GroupStatus::PendingReview],
        GroupStatus::Rejected,
        Some("not the same flat"),
    )
    .await
    .unwrap();

    assert!(repo.active_group_for_listing(a).await.unwrap().is_none());
    let rejected = repo.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("not the same flat")
    );
}

#[tokio::test]
async fn transition_group_is_conditional() {
    let (pool, _container) = setup_test_db().await;
    let a = seed_listing(&pool, "a").await;
    let repo = GroupRepository::new(pool);
    let group = repo
        .insert_group(NewListingGroup::default(), &[a])
        .await
        .unwrap();

    assert!(repo
        .transition_group(
            group.id,
            &[GroupStatus::PendingReview],
            GroupStatus::PendingAi,
            None
        )
        .await
        .unwrap());
    // Two reviewers approving concurrently: the second sees no match.
    assert!(!repo
        .transition_group(
            group.id,
            &[GroupStatus::PendingReview],
            GroupStatus::PendingAi,
            None
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn pending_review_is_oldest_first() {
    let (pool, _container) = setup_test_db().await;
    let a = seed_listing(&pool, "a").await;
    let b = seed_listing(&pool, "b").await;
    let repo = GroupRepository::new(pool.clone());

    let old = repo
        .insert_group(NewListingGroup::default(), &[a])
        .await
        .unwrap();
    let new = repo
        .insert_group(NewListingGroup::default(), &[b])
        .await
        .unwrap();
    sqlx::query("UPDATE listing_groups SET created_at = NOW() - interval '1 day' WHERE id = $1")
        .bind(old.id)
        .execute(&pool)
        .await
        .unwrap();

    let queue = repo.pending_review(10).await.unwrap();
    let ids: Vec<Uuid> = queue.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![old.id, new.id]);
}

#[tokio::test]
async fn candidates_round_trip() {
    let (pool, _container) = setup_test_db().await;
    let a = seed_listing(&pool, "a").await;
    let b = seed_listing(&pool, "b").await;
    let repo = GroupRepository::new(pool);

    repo.insert_candidates(&[
        NewDedupCandidate {
            listing_id: a,
            other_listing_id: Some(b),
            property_id: None,
            score: 0.91,
            status: CandidateStatus::NeedsReview,
        },
        NewDedupCandidate {
            listing_id: a,
            other_listing_id: None,
            property_id: None,
            score: 0.65,
            status: CandidateStatus::NeedsReview,
        },
    ])
    .await
    .unwrap();

    let candidates = repo.candidates_for_listing(a).await.unwrap();
    assert_eq!(candidates.len(), 2);
    // Highest score first.
    assert_eq!(candidates[0].score, 0.91);
    assert_eq!(candidates[0].other_listing_id, Some(b));
}

#[tokio::test]
async fn property_insert_and_merge() {
    let (pool, _container) = setup_test_db().await;
    let repo = GroupRepository::new(pool);

    let property = repo
        .insert_property(NewProperty {
            attributes: serde_json::json!({"title": "Piso", "city": "Madrid"}),
            quality_score: Some(0.7),
        })
        .await
        .unwrap();

    repo.update_property(
        property.id,
        serde_json::json!({"title": "Piso reformado", "city": "Madrid"}),
        Some(0.9),
    )
    .await
    .unwrap();

    let merged = repo.get_property(property.id).await.unwrap().unwrap();
    assert_eq!(merged.attributes["title"], "Piso reformado");
    assert_eq!(merged.quality_score, Some(0.9));
    assert_eq!(repo.list_properties().await.unwrap().len(), 1);
}
