use std::time::Duration;

use railtime_core::error::AppError;
use railtime_core::models::FetchResponse;
use railtime_core::traits::Fetcher;
use reqwest::Client;
use url::Url;

/// HTTP fetcher using reqwest.
///
/// Performs a single GET with a per-request timeout and classifies the
/// outcome into the error taxonomy: timeouts, connection failures, 429 and
/// 5xx are transient; other 4xx and malformed URLs are client errors.
/// Retrying and throttling are layered on top via
/// [`RetryingFetcher`](railtime_core::retry::RetryingFetcher) and
/// [`ThrottledFetcher`](railtime_core::throttle::ThrottledFetcher).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("railtime/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<FetchResponse, AppError> {
        let target = build_url(url, params)?;
        tracing::debug!(url = %target, "GET");

        let response = self.client.get(target.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_builder() || e.is_redirect() {
                AppError::Client {
                    status: None,
                    message: e.to_string(),
                }
            } else {
                AppError::Network(format!("Request to {target} failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        if let Some(err) = error_for_status(status, target.as_str()) {
            return Err(err);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::Network(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(FetchResponse { body, status })
    }
}

/// Join a base URL and query parameters. Only http and https are allowed.
fn build_url(url: &str, params: &[(&str, &str)]) -> Result<Url, AppError> {
    let parsed = if params.is_empty() {
        Url::parse(url)
    } else {
        Url::parse_with_params(url, params)
    }
    .map_err(|e| AppError::Client {
        status: None,
        message: format!("Invalid URL '{url}': {e}"),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(AppError::Client {
            status: None,
            message: format!("URL scheme '{scheme}' is not allowed (only http/https)"),
        }),
    }
}

/// Map a non-success status to an error; `None` for 2xx/3xx.
fn error_for_status(status: u16, url: &str) -> Option<AppError> {
    match status {
        200..=399 => None,
        429 => Some(AppError::RateLimited),
        500..=599 => Some(AppError::Server {
            status,
            url: url.to_string(),
        }),
        _ => Some(AppError::Client {
            status: Some(status),
            message: url.to_string(),
        }),
    }
}
