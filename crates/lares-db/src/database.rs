use lares_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::catalog_repository::CatalogRepository;
use crate::config::DatabaseConfig;
use crate::group_repository::GroupRepository;
use crate::listing_repository::ListingRepository;
use crate::run_repository::RunRepository;
use crate::task_repository::TaskRepository;

/// Central database facade — owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`CatalogRepository`] backed by this pool.
    pub fn catalog_repo(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    /// Get a [`RunRepository`] backed by this pool.
    pub fn run_repo(&self) -> RunRepository {
        RunRepository::new(self.pool.clone())
    }

    /// Get a [`TaskRepository`] backed by this pool.
    pub fn task_repo(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    /// Get a [`ListingRepository`] backed by this pool.
    pub fn listing_repo(&self) -> ListingRepository {
        ListingRepository::new(self.pool.clone())
    }

    /// Get a [`GroupRepository`] backed by this pool.
    pub fn group_repo(&self) -> GroupRepository {
        GroupRepository::new(self.pool.clone())
    }

    /// All five store traits behind a single handle, for services whose
    /// bounds span aggregates.
    pub fn store(&self) -> crate::pg_store::PgStore {
        crate::pg_store::PgStore::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
