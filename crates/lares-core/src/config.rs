use std::time::Duration;

use crate::error::AppError;

/// Tunables for the pipeline services.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Age after which a `Processing`/`ProcessingAi` row is considered
    /// abandoned by a dead worker.
    pub stale_after: Duration,
    /// Default batch size for discovered-listing dispatch.
    pub discovered_batch_size: usize,
    /// Default batch size for dedup processing.
    pub dedup_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            discovered_batch_size: 50,
            dedup_batch_size: 25,
        }
    }
}

impl PipelineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `LARES_STALE_AFTER_SECS` (optional, defaults to 300)
    /// - `LARES_DISCOVERED_BATCH_SIZE` (optional, defaults to 50)
    /// - `LARES_DEDUP_BATCH_SIZE` (optional, defaults to 25)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            stale_after: Duration::from_secs(parse_env(
                "LARES_STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )?),
            discovered_batch_size: parse_env(
                "LARES_DISCOVERED_BATCH_SIZE",
                defaults.discovered_batch_size as u64,
            )? as usize,
            dedup_batch_size: parse_env("LARES_DEDUP_BATCH_SIZE", defaults.dedup_batch_size as u64)?
                as usize,
        })
    }
}

fn parse_env(key: &str, default: u64) -> Result<u64, AppError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let parsed: u64 = raw.parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(format!("{key} must be at least 1")));
            }
            Ok(parsed)
        }
    }
}
