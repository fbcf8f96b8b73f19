use std::time::Duration;

use lares_core::error::AppError;
use lares_core::models::ListingPayload;
use lares_core::traits::{DiscoveryPage, Fetcher, HealthStatus};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for the browser-automation fetch service.
///
/// The service drives a real browser against the listing portals and
/// exposes three endpoints: `POST /discover` (one page of search
/// results), `POST /scrape` (one listing's full detail) and
/// `GET /health`. Discovery and scraping are slow by nature — the
/// default timeout is generous because a single call may involve page
/// loads, scrolling and bot-wall waits on the service side.
#[derive(Clone, Debug)]
pub struct FetchServiceClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl FetchServiceClient {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        // Fail fast on an unparseable base URL rather than on the first call.
        Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("invalid fetch service URL: {e}")))?;

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

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AppError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
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

        response
            .json()
            .await
            .map_err(|e| AppError::ParseFailure(format!("fetch service response: {e}")))
    }
}

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    url: &'a str,
    page: u32,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ServiceError {
    error: String,
}

/// Map a non-2xx fetch service response to the error taxonomy.
///
/// 404 means the page or listing vanished from the portal (no retry);
/// 429 and 5xx are transient (bot walls, browser crashes, overload) and
/// retryable via an explicit retry action; anything else is a contract
/// violation we surface as-is.
fn map_error_status(status: StatusCode, body: &str) -> AppError {
    let detail = serde_json::from_str::<ServiceError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => AppError::TargetNotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => AppError::TransientFetch(format!("rate limited: {detail}")),
        s if s.is_server_error() => AppError::TransientFetch(detail),
        _ => AppError::Generic(format!("fetch service error ({}): {detail}", status.as_u16())),
    }
}

impl Fetcher for FetchServiceClient {
    async fn discover(&self, url: &str, page: u32) -> Result<DiscoveryPage, AppError> {
        tracing::debug!(url, page, "requesting discovery page");
        self.post_json("/discover", &DiscoverRequest { url, page })
            .await
    }

    async fn scrape(&self, url: &str) -> Result<ListingPayload, AppError> {
        tracing::debug!(url, "requesting listing detail");
        self.post_json("/scrape", &ScrapeRequest { url }).await
    }

    async fn health(&self) -> Result<HealthStatus, AppError> {
        let url = format!("{}/health", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
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

        response
            .json()
            .await
            .map_err(|e| AppError::ParseFailure(format!("health response: {e}")))
    }
}
