//! Readiness polling for an AUTOMATIC1111 server that is still booting.
//!
//! The WebUI takes a while to load its models after the container
//! starts. [`wait_for_service`] probes `/progress` on a fixed interval
//! until the server answers with any success status, or until the
//! [`CancellationToken`] fires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::A1111Api;

/// Name used in readiness log lines.
pub const SERVICE_NAME: &str = "AUTOMATIC1111 WebUI API";

/// Tunable parameters for readiness polling.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between probes.
    pub interval: Duration,
    /// Log every N-th failed probe (the first failure is always logged).
    pub log_every: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            log_every: 15,
        }
    }
}

/// How polling ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The server answered the probe.
    Ready {
        /// Probes that failed before the successful one.
        failed_attempts: u32,
    },
    /// The cancellation token fired first.
    Cancelled { failed_attempts: u32 },
}

/// Whether the `attempt`-th failure (1-based) should be logged.
pub fn should_log_attempt(attempt: u32, log_every: u32) -> bool {
    attempt == 1 || (log_every > 0 && attempt % log_every == 0)
}

/// Poll the server until it is ready to accept requests.
///
/// Never gives up on its own: the server may legitimately need several
/// minutes on a cold start. Stop it with `cancel`.
pub async fn wait_for_service(
    api: &A1111Api,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Readiness {
    let mut failed_attempts = 0u32;

    tracing::info!(url = %api.api_url(), "Waiting for {SERVICE_NAME} to be ready");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(failed_attempts, "Readiness polling cancelled");
                return Readiness::Cancelled { failed_attempts };
            }
            result = api.probe() => {
                match result {
                    Ok(_) => {
                        tracing::info!(failed_attempts, "{SERVICE_NAME} is ready");
                        return Readiness::Ready { failed_attempts };
                    }
                    Err(e) => {
                        failed_attempts += 1;
                        if should_log_attempt(failed_attempts, config.log_every) {
                            tracing::info!(
                                attempt = failed_attempts,
                                error_kind = e.kind(),
                                error = %e,
                                "{SERVICE_NAME} not ready yet, retrying",
                            );
                        }
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(failed_attempts, "Readiness polling cancelled");
                return Readiness::Cancelled { failed_attempts };
            }
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
