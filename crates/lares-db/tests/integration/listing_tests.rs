use lares_core::models::{ListingPayload, NewDiscoveredListing, NewListing, NewScrapeRun};
use lares_core::status::{DedupStatus, DiscoveredStatus};
use lares_core::store::{ListingStore, RunStore};
use lares_db::{ListingRepository, RunRepository};
use uuid::Uuid;

use crate::common::{seed_platform_and_query, setup_test_db};

async fn seed_run(pool: &sqlx::PgPool) -> (Uuid, Uuid) {
    let (platform_id, query_id) = seed_platform_and_query(pool).await;
    let run = RunRepository::new(pool.clone())
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();
    (platform_id, run.id)
}

fn discovered(platform_id: Uuid, run_id: Uuid, external_id: &str, priority: i32) -> NewDiscoveredListing {
    NewDiscoveredListing {
        platform_id,
        run_id,
        external_id: external_id.into(),
        url: format!("https://portal.test/l/{external_id}"),
        priority,
    }
}

fn payload(title: &str) -> ListingPayload {
    ListingPayload {
        title: Some(title.into()),
        price: Some(250_000.0),
        city: Some("Madrid".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn insert_discovered_dedups_within_run() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool);

    let first = repo
        .insert_discovered(discovered(platform_id, run_id, "ext-1", 0))
        .await
        .unwrap();
    // Same external id re-listed on a later page of the same run.
    let second = repo
        .insert_discovered(discovered(platform_id, run_id, "ext-1", 5))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.priority, 0);
}

#[tokio::test]
async fn select_pending_orders_by_priority_then_age() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool.clone());

    let a = repo
        .insert_discovered(discovered(platform_id, run_id, "a", 0))
        .await
        .unwrap();
    let b = repo
        .insert_discovered(discovered(platform_id, run_id, "b", 10))
        .await
        .unwrap();
    let c = repo
        .insert_discovered(discovered(platform_id, run_id, "c", 0))
        .await
        .unwrap();

    // Make relative ages deterministic: a older than c.
    sqlx::query("UPDATE discovered_listings SET created_at = NOW() - interval '1 hour' WHERE id = $1")
        .bind(a.id)
        .execute(&pool)
        .await
        .unwrap();

    let rows = repo.select_pending_discovered(None, 2).await.unwrap();
    let ids: Vec<Uuid> = rows.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
    let _ = c;
}

#[tokio::test]
async fn transition_discovered_is_conditional() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool);

    let d = repo
        .insert_discovered(discovered(platform_id, run_id, "ext-1", 0))
        .await
        .unwrap();

    assert!(repo
        .transition_discovered(
            d.id,
            &[DiscoveredStatus::Pending],
            DiscoveredStatus::Queued,
            None
        )
        .await
        .unwrap());
    // Already queued; a concurrent dispatcher must lose.
    assert!(!repo
        .transition_discovered(
            d.id,
            &[DiscoveredStatus::Pending],
            DiscoveredStatus::Queued,
            None
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn upsert_listing_updates_by_external_id() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool);

    let first = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-1".into()),
            url: "https://portal.test/l/ext-1".into(),
            payload: Some(payload("Piso centro")),
        })
        .await
        .unwrap();
    assert_eq!(first.dedup_status, DedupStatus::Pending);

    // Mark it unique, then re-scrape: an unlinked listing re-enters dedup.
    repo.transition_dedup(first.id, &[DedupStatus::Pending], DedupStatus::Unique)
        .await
        .unwrap();
    let second = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-1".into()),
            url: "https://portal.test/l/ext-1".into(),
            payload: Some(payload("Piso centro reformado")),
        })
        .await
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.dedup_status, DedupStatus::Pending);
    assert_eq!(
        second.payload.unwrap().title.as_deref(),
        Some("Piso centro reformado")
    );
}

#[tokio::test]
async fn upsert_listing_keeps_linked_listing_out_of_dedup() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool.clone());

    let listing = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-1".into()),
            url: "https://portal.test/l/ext-1".into(),
            payload: Some(payload("Piso centro")),
        })
        .await
        .unwrap();

    let (property_id,): (Uuid,) =
        sqlx::query_as(r#"INSERT INTO properties (attributes) VALUES ('{}') RETURNING id"#)
            .fetch_one(&pool)
            .await
            .unwrap();
    repo.set_listing_property(listing.id, property_id)
        .await
        .unwrap();

    let rescraped = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-1".into()),
            url: "https://portal.test/l/ext-1".into(),
            payload: Some(payload("Piso centro, precio rebajado")),
        })
        .await
        .unwrap();

    assert_eq!(rescraped.id, listing.id);
    assert_eq!(rescraped.property_id, Some(property_id));
    assert_eq!(rescraped.dedup_status, DedupStatus::Completed);

    // Linked listings never show up for dedup selection.
    assert!(repo.select_dedup_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_stale_processing_honors_cutoff() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, run_id) = seed_run(&pool).await;
    let repo = ListingRepository::new(pool.clone());

    let stuck = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-1".into()),
            url: "https://portal.test/l/ext-1".into(),
            payload: Some(payload("Piso centro")),
        })
        .await
        .unwrap();
    repo.transition_dedup(stuck.id, &[DedupStatus::Pending], DedupStatus::Processing)
        .await
        .unwrap();

    // A listing parked after deferring to another worker.
    let parked = repo
        .upsert_listing(NewListing {
            platform_id,
            discovered_id: None,
            run_id: Some(run_id),
            external_id: Some("ext-2".into()),
            url: "https://portal.test/l/ext-2".into(),
            payload: Some(payload("Piso norte")),
        })
        .await
        .unwrap();
    sqlx::query("UPDATE listings SET dedup_status = 'waiting' WHERE id = $1")
        .bind(parked.id)
        .execute(&pool)
        .await
        .unwrap();

    // Fresh claims: nothing to reset.
    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(5);
    assert_eq!(repo.reset_stale_processing(cutoff).await.unwrap(), 0);

    sqlx::query("UPDATE listings SET updated_at = NOW() - interval '10 minutes'")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(repo.reset_stale_processing(cutoff).await.unwrap(), 2);

    for id in [stuck.id, parked.id] {
        let reset = repo.get_listing(id).await.unwrap().unwrap();
        assert_eq!(reset.dedup_status, DedupStatus::Pending);
    }
}
