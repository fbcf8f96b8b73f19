use lares_core::error::AppError;
use lares_core::models::{NewScrapeRun, NewScrapeTask};
use lares_core::status::{RunStatus, TaskKind, TaskStatus};
use lares_core::store::{CatalogStore, RunStore, TaskStore};
use lares_db::{CatalogRepository, RunRepository, TaskRepository};
use uuid::Uuid;

use crate::common::{seed_platform_and_query, setup_test_db};

#[tokio::test]
async fn insert_run_starts_pending() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let repo = RunRepository::new(pool);

    let run = repo
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Pending);
    assert!(run.started_at.is_none());
    assert!(run.completed_at.is_none());
}

#[tokio::test]
async fn transition_run_is_conditional() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let repo = RunRepository::new(pool);
    let run = repo
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    let moved = repo
        .transition_run(run.id, &[RunStatus::Pending], RunStatus::Discovering, None)
        .await
        .unwrap();
    assert!(moved);

    // The run already left Pending; a second identical transition loses.
    let moved_again = repo
        .transition_run(run.id, &[RunStatus::Pending], RunStatus::Discovering, None)
        .await
        .unwrap();
    assert!(!moved_again);

    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Discovering);
    assert!(run.started_at.is_some());
}

#[tokio::test]
async fn find_active_run_ignores_finished_runs() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let repo = RunRepository::new(pool);

    let first = repo
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();
    assert!(repo.find_active_run(query_id).await.unwrap().is_some());

    repo.transition_run(
        first.id,
        &[RunStatus::Pending],
        RunStatus::Stopped,
        Some("operator stop"),
    )
    .await
    .unwrap();
    assert!(repo.find_active_run(query_id).await.unwrap().is_none());
}

#[tokio::test]
async fn set_next_run_at_rejects_unknown_query() {
    let (pool, _container) = setup_test_db().await;
    let (_platform_id, query_id) = seed_platform_and_query(&pool).await;
    let repo = CatalogRepository::new(pool);

    let at = chrono::Utc::now() + chrono::Duration::hours(1);
    repo.set_next_run_at(query_id, Some(at)).await.unwrap();
    let query = repo.get_query(query_id).await.unwrap().unwrap();
    assert!(query.next_run_at.is_some());

    // An unknown id must surface, not silently update zero rows.
    let err = repo
        .set_next_run_at(Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn claim_next_task_is_exclusive_and_fifo() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let runs = RunRepository::new(pool.clone());
    let tasks = TaskRepository::new(pool);
    let run = runs
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    let first = tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s?p=1", 1))
        .await
        .unwrap();
    tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s?p=2", 2))
        .await
        .unwrap();

    let claimed = tasks.claim_next_task("worker-1").await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

    let second = tasks.claim_next_task("worker-2").await.unwrap().unwrap();
    assert_ne!(second.id, claimed.id);

    assert!(tasks.claim_next_task("worker-3").await.unwrap().is_none());
}

#[tokio::test]
async fn task_target_round_trips_through_jsonb() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let runs = RunRepository::new(pool.clone());
    let tasks = TaskRepository::new(pool);
    let run = runs
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    let discovered_id = Uuid::new_v4();
    let page = tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s", 4))
        .await
        .unwrap();
    let fetch = tasks
        .insert_task(NewScrapeTask::listing(run.id, discovered_id).with_parent(page.id))
        .await
        .unwrap();

    assert_eq!(page.kind, TaskKind::Discovery);
    assert_eq!(fetch.kind, TaskKind::ListingFetch);

    let reloaded = tasks.get_task(fetch.id).await.unwrap().unwrap();
    assert_eq!(reloaded.target, fetch.target);
    assert_eq!(reloaded.parent_id, Some(page.id));
}

#[tokio::test]
async fn delete_pending_tasks_scoped_by_kind() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let runs = RunRepository::new(pool.clone());
    let tasks = TaskRepository::new(pool);
    let run = runs
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s", 1))
        .await
        .unwrap();
    tasks
        .insert_task(NewScrapeTask::listing(run.id, Uuid::new_v4()))
        .await
        .unwrap();

    let cleared = tasks
        .delete_pending_tasks(run.id, Some(TaskKind::ListingFetch))
        .await
        .unwrap();
    assert_eq!(cleared, 1);
    assert_eq!(tasks.count_tasks(run.id, None, None).await.unwrap(), 1);
}

#[tokio::test]
async fn release_worker_tasks_requeues_running() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let runs = RunRepository::new(pool.clone());
    let tasks = TaskRepository::new(pool);
    let run = runs
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s", 1))
        .await
        .unwrap();
    let claimed = tasks.claim_next_task("worker-1").await.unwrap().unwrap();

    let released = tasks.release_worker_tasks("worker-1").await.unwrap();
    assert_eq!(released, 1);

    let task = tasks.get_task(claimed.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.worker_id.is_none());
    assert!(task.started_at.is_none());
}

#[tokio::test]
async fn run_stats_recomputed_from_child_rows() {
    let (pool, _container) = setup_test_db().await;
    let (platform_id, query_id) = seed_platform_and_query(&pool).await;
    let runs = RunRepository::new(pool.clone());
    let tasks = TaskRepository::new(pool.clone());
    let run = runs
        .insert_run(NewScrapeRun {
            query_id,
            platform_id,
        })
        .await
        .unwrap();

    let done = tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s?p=1", 1))
        .await
        .unwrap();
    tasks
        .insert_task(NewScrapeTask::page(run.id, "https://portal.test/s?p=2", 2))
        .await
        .unwrap();
    tasks
        .transition_task(done.id, TaskStatus::Pending, TaskStatus::Running, None)
        .await
        .unwrap();
    tasks
        .transition_task(done.id, TaskStatus::Running, TaskStatus::Completed, None)
        .await
        .unwrap();

    sqlx::query(
        r#"
        INSERT INTO discovered_listings (platform_id, run_id, external_id, url, status)
        VALUES ($1, $2, 'ext-1', 'https://portal.test/l/1', 'scraped'),
               ($1, $2, 'ext-2', 'https://portal.test/l/2', 'pending')
        "#,
    )
    .bind(platform_id)
    .bind(run.id)
    .execute(&pool)
    .await
    .unwrap();

    let stats = runs.run_stats(run.id).await.unwrap();
    assert_eq!(stats.discovery_total_pages, 2);
    assert_eq!(stats.discovery_done_pages, 1);
    assert_eq!(stats.listings_found, 2);
    assert_eq!(stats.listings_scraped, 1);
    assert_eq!(stats.listings_failed, 0);
}
