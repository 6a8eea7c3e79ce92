//! REST API client for the AUTOMATIC1111 `/sdapi/v1` endpoints.
//!
//! Wraps health probing, options read/write and inference submission
//! using [`reqwest`]. Every call goes through the client's
//! [`RetryPolicy`].

use std::time::Duration;

use reqwest::{Method, StatusCode};
use sdw_core::payload::Endpoint;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::retry::RetryPolicy;

/// Base URL of a WebUI started with `--api` on the worker's port.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/sdapi/v1";

/// Timeout for the lightweight `/progress` health probe.
pub const PROGRESS_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for `POST /options`. Switching checkpoints loads weights.
pub const SET_OPTIONS_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for `GET /options`.
pub const GET_OPTIONS_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for a single `txt2img` / `img2img` call.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(600);

/// HTTP client for a single AUTOMATIC1111 instance.
#[derive(Debug, Clone)]
pub struct A1111Api {
    client: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
    inference_timeout: Duration,
}

/// Errors from the AUTOMATIC1111 REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum A1111ApiError {
    /// The HTTP request itself failed (connect, timeout, body decode, etc.).
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("{status} {} Error: {reason} for url: {url}", status_class(*.status))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status.
        reason: String,
        /// Full request URL.
        url: String,
        /// Raw response body for debugging.
        body: String,
    },
}

impl A1111ApiError {
    /// Short category used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            A1111ApiError::Status { .. } => "status",
            A1111ApiError::Request(e) if e.is_connect() => "connect",
            A1111ApiError::Request(e) if e.is_timeout() => "timeout",
            A1111ApiError::Request(e) if e.is_decode() => "decode",
            A1111ApiError::Request(_) => "request",
        }
    }

    /// HTTP status code, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            A1111ApiError::Status { status, .. } => Some(*status),
            A1111ApiError::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

impl A1111Api {
    /// Create a new API client for an AUTOMATIC1111 instance.
    ///
    /// * `api_url` - Base API URL including `/sdapi/v1`, e.g.
    ///   `http://127.0.0.1:3000/sdapi/v1`. A trailing slash is ignored.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            retry: RetryPolicy::default(),
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the timeout applied to inference calls.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    /// Base API URL (e.g. `http://127.0.0.1:3000/sdapi/v1`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Retry policy applied to every request.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Read generation progress with `GET /progress?skip_current_image=true`.
    pub async fn progress(&self) -> Result<Value, A1111ApiError> {
        let response = self.get_progress().await?;
        Ok(response.json::<Value>().await?)
    }

    /// Health check: succeeds on any 2xx answer from `/progress`.
    ///
    /// `/progress` is cheap to serve even while a generation is running.
    /// The body is not inspected.
    pub async fn probe(&self) -> Result<(), A1111ApiError> {
        self.get_progress().await?;
        Ok(())
    }

    /// Update server options with `POST /options`.
    pub async fn set_options(&self, options: &Value) -> Result<(), A1111ApiError> {
        self.send(Method::POST, "options", Some(options), SET_OPTIONS_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Read the current server options with `GET /options`.
    pub async fn get_options(&self) -> Result<Value, A1111ApiError> {
        let response = self
            .send::<()>(Method::GET, "options", None, GET_OPTIONS_TIMEOUT)
            .await?;
        Ok(response.json::<Value>().await?)
    }

    /// Run a `txt2img` or `img2img` generation and return the raw JSON
    /// response (base64 images, parameters, info string).
    pub async fn run_inference(
        &self,
        endpoint: Endpoint,
        payload: &Map<String, Value>,
    ) -> Result<Value, A1111ApiError> {
        tracing::info!(url = %self.url(endpoint.path()), "Sending request to AUTOMATIC1111 API");

        let response = self
            .send(Method::POST, endpoint.path(), Some(payload), self.inference_timeout)
            .await?;
        Ok(response.json::<Value>().await?)
    }

    // ---- private helpers ----

    async fn get_progress(&self) -> Result<reqwest::Response, A1111ApiError> {
        self.send::<()>(
            Method::GET,
            "progress?skip_current_image=true",
            None,
            PROGRESS_TIMEOUT,
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    /// Send a request under the retry policy and ensure a success status.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<reqwest::Response, A1111ApiError> {
        let url = self.url(path);
        let mut retry = 0u32;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .timeout(timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            let can_retry = retry < self.retry.max_retries;

            match request.send().await {
                Ok(response)
                    if can_retry && self.retry.retries_status(&method, response.status()) =>
                {
                    tracing::debug!(
                        url = %url,
                        status = response.status().as_u16(),
                        retry = retry + 1,
                        "Retrying request after error status",
                    );
                }
                Ok(response) => return Self::ensure_success(response).await,
                Err(e) if can_retry && self.retry.retries_error(&method, &e) => {
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        retry = retry + 1,
                        "Retrying request after transport error",
                    );
                }
                Err(e) => return Err(A1111ApiError::Request(e)),
            }

            retry += 1;
            let delay = self.retry.backoff(retry);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`A1111ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, A1111ApiError> {
        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(A1111ApiError::Status {
                status: status.as_u16(),
                reason: reason_phrase(status),
                url,
                body,
            });
        }
        Ok(response)
    }
}

/// `Client` for 4xx, `Server` for 5xx.
fn status_class(status: u16) -> &'static str {
    match status {
        400..=499 => "Client",
        500..=599 => "Server",
        _ => "HTTP",
    }
}

fn reason_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("Unknown Status")
        .to_string()
}
