use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use uuid::Uuid;

use lares_db::Database;

/// Spins up a PostgreSQL container, runs the workspace migrations, and
/// returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "lares_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/lares_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    Database::from_pool(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

/// Seed one platform and one search query, returning their ids.
pub async fn seed_platform_and_query(pool: &PgPool) -> (Uuid, Uuid) {
    let (platform_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO platforms (name, slug, base_url)
        VALUES ('Portal Test', 'portal-test', 'https://portal.test')
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed platform");

    let (query_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO search_queries (platform_id, name, url, auto_run, frequency)
        VALUES ($1, 'madrid-rent', 'https://portal.test/s/madrid', TRUE, 'daily')
        RETURNING id
        "#,
    )
    .bind(platform_id)
    .fetch_one(pool)
    .await
    .expect("Failed to seed query");

    (platform_id, query_id)
}
