//! Core domain logic for the lares ingestion pipeline: run
//! orchestration, discovery and fetch tasks, listing deduplication,
//! group review, and property synthesis.

pub mod config;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod score;
pub mod status;
pub mod store;
pub mod synthesis;
pub mod tasks;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::PipelineConfig;
pub use dedup::{DedupEngine, DedupOutcome};
pub use error::AppError;
pub use lifecycle::{JobLifecycleManager, StaleReport};
pub use models::{ListingPayload, QueueDepth, RunProgress, RunStats};
pub use orchestrator::{DueRunReport, RunOrchestrator};
pub use score::AttributeScorer;
pub use synthesis::{SynthesisGate, SynthesisResult};
pub use tasks::TaskManager;
pub use traits::{Fetcher, MatchScorer, Synthesizer};
pub use worker::{TaskWorker, TracingWorkerReporter, WorkerConfig, WorkerReporter};
