//! The worker loop: take a job, run it, report the outcome, repeat.
//!
//! Jobs are processed strictly one at a time. The loop ends when the
//! [`CancellationToken`] fires or the source is exhausted.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sdw_a1111::api::A1111Api;

use crate::handler::{handle_job, JobOutcome};
use crate::queue::{Job, JobSource, QueueError};

/// Default delay between polls of an idle or failing job source.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    /// Outcomes that could not be delivered back to the source.
    pub undelivered: u64,
}

/// Run a job in its own task so a panic becomes a failed outcome rather
/// than taking the worker down.
pub async fn run_job(api: &A1111Api, job: Job) -> JobOutcome {
    let api = api.clone();
    let task = tokio::spawn(async move { handle_job(&api, job.input).await });

    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Job handler task failed");
            JobOutcome::unexpected(e)
        }
    }
}

/// Process jobs from `source` until cancelled or exhausted.
pub async fn run_worker(
    api: &A1111Api,
    source: &mut dyn JobSource,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    tracing::info!("Worker loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = source.next_job() => next,
        };

        match next {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                tracing::info!(job_id = %job_id, "Processing job");

                let outcome = run_job(api, job).await;
                if outcome.is_success() {
                    stats.completed += 1;
                } else {
                    stats.failed += 1;
                }
                tracing::info!(
                    job_id = %job_id,
                    success = outcome.is_success(),
                    status_code = ?outcome.status_code(),
                    "Job finished",
                );

                if let Err(e) = source.submit(&job_id, &outcome).await {
                    stats.undelivered += 1;
                    tracing::error!(job_id = %job_id, error = %e, "Failed to report job outcome");
                }
                continue;
            }
            Ok(None) if source.is_exhausted() => {
                tracing::info!("Job source exhausted");
                break;
            }
            Ok(None) => {}
            Err(e) => {
                if let QueueError::InvalidJob { job_id: Some(_), .. } = e {
                    stats.failed += 1;
                }
                tracing::warn!(error = %e, "Failed to take next job");
                if source.is_exhausted() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        undelivered = stats.undelivered,
        "Worker loop stopped",
    );
    stats
}
