use std::time::Duration;

use lares_core::error::AppError;
use lares_core::models::ListingPayload;
use lares_core::traits::{SynthesisOutcome, Synthesizer};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for the AI synthesis service.
///
/// Posts a group's listing payloads to `POST /synthesize` and receives
/// either canonical property attributes with a quality score, or an
/// explicit rejection with a human-readable reason. A rejection is a
/// verdict on the group, not a transport failure — it surfaces as
/// [`AppError::SynthesisRejected`] and is never retryable.
#[derive(Clone, Debug)]
pub struct SynthesisServiceClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl SynthesisServiceClient {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_SYNTHESIS_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("invalid synthesis service URL: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    group_id: Uuid,
    listings: &'a [ListingPayload],
}

#[derive(Deserialize)]
struct RejectionBody {
    reason: String,
}

impl Synthesizer for SynthesisServiceClient {
    async fn synthesize(
        &self,
        group_id: Uuid,
        listings: &[ListingPayload],
    ) -> Result<SynthesisOutcome, AppError> {
        let url = format!("{}/synthesize", self.base_url);
        tracing::debug!(%group_id, listings = listings.len(), "requesting synthesis");

        let response = self
            .client
            .post(&url)
            .json(&SynthesizeRequest { group_id, listings })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body));
        }

        let outcome: SynthesisOutcome = response
            .json()
            .await
            .map_err(|e| AppError::ParseFailure(format!("synthesis response: {e}")))?;

        if !(0.0..=1.0).contains(&outcome.quality_score) {
            return Err(AppError::ParseFailure(format!(
                "quality score {} out of range",
                outcome.quality_score
            )));
        }

        Ok(outcome)
    }
}

/// 422 is the service declining the group (conflicting listings, too
/// little data); everything else follows the fetch client's taxonomy.
fn map_error_status(status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let reason = serde_json::from_str::<RejectionBody>(body)
            .map(|r| r.reason)
            .unwrap_or_else(|_| "no reason given".to_string());
        return AppError::SynthesisRejected(reason);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return AppError::NetworkError(format!(
            "synthesis service unavailable (HTTP {})",
            status.as_u16()
        ));
    }

    AppError::Generic(format!(
        "synthesis service error ({}): {body}",
        status.as_u16()
    ))
}
