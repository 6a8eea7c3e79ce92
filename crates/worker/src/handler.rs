//! Job handler: payload transformation, inference, and error mapping.
//!
//! [`handle_job`] never fails. Every problem is folded into a
//! [`JobOutcome::Failed`] carrying a message and an HTTP-style status
//! code, which is what the job queue reports back to the caller.

use serde::Serialize;
use serde_json::Value;

use sdw_a1111::api::{A1111Api, A1111ApiError};
use sdw_core::error::CoreError;
use sdw_core::payload::prepare_payload;

/// Status reported when the input could not be turned into a request.
pub const STATUS_BAD_INPUT: u16 = 400;
/// Status reported for failures with no better classification.
pub const STATUS_INTERNAL: u16 = 500;
/// Status reported when the inference server could not be reached.
pub const STATUS_UNAVAILABLE: u16 = 503;

/// Result of a single job.
///
/// Serializes as the raw inference response on success, or as
/// `{"error": "...", "status_code": N}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Completed(Value),
    Failed { error: String, status_code: u16 },
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>, status_code: u16) -> Self {
        JobOutcome::Failed {
            error: error.into(),
            status_code,
        }
    }

    /// Catch-all for failures outside the inference call (e.g. a panicked task).
    pub fn unexpected(error: impl std::fmt::Display) -> Self {
        Self::failed(
            format!("An unexpected error occurred in the handler: {error}"),
            STATUS_INTERNAL,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            JobOutcome::Completed(_) => None,
            JobOutcome::Failed { status_code, .. } => Some(*status_code),
        }
    }
}

/// Map an inference API error to a failed outcome.
///
/// Error statuses keep the server's code and body; transport failures
/// (connect, timeout, unreadable body) report 503.
pub fn outcome_for_api_error(err: &A1111ApiError) -> JobOutcome {
    match err {
        A1111ApiError::Status { status, body, .. } => JobOutcome::failed(
            format!("AUTOMATIC1111 API HTTP Error: {err} - Status: {status} - Response: {body}"),
            *status,
        ),
        A1111ApiError::Request(_) => JobOutcome::failed(
            format!("AUTOMATIC1111 API Request Error: {err}"),
            STATUS_UNAVAILABLE,
        ),
    }
}

fn outcome_for_core_error(err: &CoreError) -> JobOutcome {
    match err {
        CoreError::Validation(msg) => {
            JobOutcome::failed(format!("Invalid job input: {msg}"), STATUS_BAD_INPUT)
        }
        other => JobOutcome::unexpected(other),
    }
}

/// Run one job end to end.
///
/// `input` is the job's `input` object: generation parameters for
/// `txt2img`/`img2img` plus an optional `loras` list.
pub async fn handle_job(api: &A1111Api, input: Value) -> JobOutcome {
    let prepared = match prepare_payload(input) {
        Ok(prepared) => prepared,
        Err(e) => {
            let outcome = outcome_for_core_error(&e);
            tracing::error!(error = %e, "Rejected job input");
            return outcome;
        }
    };

    if !prepared.loras.is_empty() {
        tracing::info!(
            lora_count = prepared.loras.len(),
            prompt = prepared.prompt().unwrap_or_default(),
            "Prompt modified with LoRAs",
        );
    }
    if prepared.skipped_loras > 0 {
        tracing::warn!(skipped = prepared.skipped_loras, "Some LoRA entries were skipped");
    }
    tracing::debug!(
        endpoint = %prepared.endpoint,
        filled_defaults = ?prepared.filled_defaults,
        "Payload prepared",
    );

    match api.run_inference(prepared.endpoint, &prepared.body).await {
        Ok(response) => JobOutcome::Completed(response),
        Err(e) => {
            let outcome = outcome_for_api_error(&e);
            if let JobOutcome::Failed { error, status_code } = &outcome {
                tracing::error!(status_code, error_kind = e.kind(), "{error}");
            }
            outcome
        }
    }
}
