//! Retry policy for requests against a local inference server.
//!
//! The server drops connections while it boots and answers 5xx under
//! load, so every request goes through [`RetryPolicy`]. Delays grow
//! exponentially from [`RetryPolicy::backoff_factor`]; the first retry
//! is immediate.

use std::time::Duration;

use reqwest::{Method, StatusCode};

/// Status codes retried for idempotent requests by default.
pub const DEFAULT_STATUS_FORCELIST: [u16; 4] = [500, 502, 503, 504];

/// Tunable parameters for request retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Base unit for the exponential backoff.
    pub backoff_factor: Duration,
    /// Upper bound on any single backoff delay.
    pub max_backoff: Duration,
    /// Response statuses that trigger a retry of an idempotent request.
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 15,
            backoff_factor: Duration::from_millis(300),
            max_backoff: Duration::from_secs(120),
            status_forcelist: DEFAULT_STATUS_FORCELIST.to_vec(),
        }
    }
}

/// Methods that may be replayed after the server has seen the request.
pub fn is_idempotent(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .contains(method)
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    ///
    /// `0` for the first retry, then `backoff_factor * 2^(retry - 1)`,
    /// clamped to [`max_backoff`](Self::max_backoff).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let factor = 2f64.powi(retry.saturating_sub(1).min(62) as i32);
        let millis = self.backoff_factor.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(u64::MAX as f64) as u64).min(self.max_backoff)
    }

    /// Whether a response with `status` should be retried.
    ///
    /// Only idempotent requests are replayed; a `POST` that reached the
    /// server is never sent twice.
    pub fn retries_status(&self, method: &Method, status: StatusCode) -> bool {
        is_idempotent(method) && self.status_forcelist.contains(&status.as_u16())
    }

    /// Whether a transport error should be retried.
    ///
    /// Connection failures are safe for any method because the request
    /// never reached the server. Timeouts are retried for idempotent
    /// requests only.
    pub fn retries_error(&self, method: &Method, err: &reqwest::Error) -> bool {
        err.is_connect() || (err.is_timeout() && is_idempotent(method))
    }
}
