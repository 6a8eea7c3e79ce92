//! Switching the active Stable Diffusion checkpoint.
//!
//! The checkpoint is a server-wide option. After writing it the server
//! reports the loaded model by title, which usually carries a hash
//! suffix (`model.safetensors [a1b2c3d4]`), so verification is a
//! substring match rather than equality.

use std::time::Duration;

use serde_json::json;

use crate::api::{A1111Api, A1111ApiError};

/// Options key holding the active checkpoint.
pub const CHECKPOINT_OPTION_KEY: &str = "sd_model_checkpoint";

/// Pause between writing the option and reading it back.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Result of a checkpoint switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStatus {
    /// The server reports a checkpoint whose title contains the requested name.
    Confirmed { reported: String },
    /// The server accepted the write but reports something else (or nothing).
    Unverified {
        requested: String,
        reported: Option<String>,
    },
}

/// Compare the requested checkpoint against what the server reports.
pub fn verify_checkpoint(requested: &str, reported: Option<&str>) -> CheckpointStatus {
    match reported {
        Some(title) if !title.is_empty() && title.contains(requested) => {
            CheckpointStatus::Confirmed {
                reported: title.to_string(),
            }
        }
        _ => CheckpointStatus::Unverified {
            requested: requested.to_string(),
            reported: reported.map(str::to_string),
        },
    }
}

/// Set the server's checkpoint and read it back.
///
/// * `model` - title or file name of a model under `models/Stable-diffusion`,
///   e.g. `model.safetensors`.
///
/// A mismatch is not an error: it is returned as
/// [`CheckpointStatus::Unverified`] and logged as a warning.
pub async fn set_model_checkpoint(
    api: &A1111Api,
    model: &str,
    settle_delay: Duration,
) -> Result<CheckpointStatus, A1111ApiError> {
    tracing::info!(model, "Setting SD model checkpoint");

    api.set_options(&json!({ CHECKPOINT_OPTION_KEY: model }))
        .await?;

    tokio::time::sleep(settle_delay).await;

    let options = api.get_options().await?;
    let reported = options.get(CHECKPOINT_OPTION_KEY).and_then(|v| v.as_str());
    let status = verify_checkpoint(model, reported);

    match &status {
        CheckpointStatus::Confirmed { reported } => {
            tracing::info!(reported = %reported, "SD model checkpoint set");
        }
        CheckpointStatus::Unverified { requested, reported } => {
            tracing::warn!(
                requested = %requested,
                reported = ?reported,
                "SD model checkpoint may not have been set; ensure the model name matches \
                 what the server lists and that the file is in models/Stable-diffusion",
            );
        }
    }

    Ok(status)
}
