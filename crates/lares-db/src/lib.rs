pub mod catalog_repository;
pub mod config;
pub mod database;
pub mod group_repository;
pub mod listing_repository;
pub mod pg_store;
pub mod run_repository;
pub mod task_repository;

pub use catalog_repository::CatalogRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use group_repository::GroupRepository;
pub use listing_repository::ListingRepository;
pub use pg_store::PgStore;
pub use run_repository::RunRepository;
pub use task_repository::TaskRepository;
