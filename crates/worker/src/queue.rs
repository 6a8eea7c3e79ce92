//! Job sources: where jobs come from and where outcomes go.
//!
//! [`HttpJobQueue`] talks to a serverless job queue over HTTP: it takes
//! one job at a time for this worker and posts the outcome back.
//! [`LocalJobFile`] runs a single job from a JSON file and writes the
//! outcome locally, for testing a worker image without a queue.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handler::{JobOutcome, STATUS_BAD_INPUT};

/// Placeholder substituted into queue URLs (worker id for take, job id for done).
pub const ID_PLACEHOLDER: &str = "$ID";

/// Job id used when a local job file does not name one.
pub const LOCAL_JOB_ID: &str = "local_test";

/// A unit of work delivered by a [`JobSource`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Job {
    pub id: String,
    /// Generation parameters. Missing input surfaces as a rejected job.
    #[serde(default)]
    pub input: Value,
}

/// Job file layout, where the id may be omitted.
#[derive(Deserialize)]
struct LocalJob {
    #[serde(default = "default_local_job_id")]
    id: String,
    #[serde(default)]
    input: Value,
}

fn default_local_job_id() -> String {
    LOCAL_JOB_ID.to_string()
}

impl From<LocalJob> for Job {
    fn from(job: LocalJob) -> Self {
        Job {
            id: job.id,
            input: job.input,
        }
    }
}

/// Errors from a job source's transport.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The HTTP request itself failed.
    #[error("Job queue request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The queue returned a non-2xx status code.
    #[error("Job queue error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Reading or writing a local job file failed.
    #[error("Job file error: {0}")]
    Io(#[from] std::io::Error),

    /// A job could not be decoded.
    #[error("Malformed job: {0}")]
    Parse(#[from] serde_json::Error),

    /// A dequeued job was rejected before running. When the id could be
    /// read, a failed outcome has already been posted for it.
    #[error("Rejected job {}: {reason}", job_id.as_deref().unwrap_or("<no id>"))]
    InvalidJob {
        job_id: Option<String>,
        reason: String,
    },
}

/// Source of jobs for the worker loop.
#[async_trait]
pub trait JobSource: Send {
    /// Take the next job, or `None` when nothing is queued right now.
    async fn next_job(&mut self) -> Result<Option<Job>, QueueError>;

    /// Report the outcome of a job taken from this source.
    async fn submit(&mut self, job_id: &str, outcome: &JobOutcome) -> Result<(), QueueError>;

    /// `true` once the source will never yield another job.
    fn is_exhausted(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Local job file
// ---------------------------------------------------------------------------

/// Runs exactly one job read from a JSON file of the form
/// `{"id": "...", "input": {...}}`.
///
/// The outcome is printed to stdout, or written to
/// [`with_output`](Self::with_output) when set.
#[derive(Debug)]
pub struct LocalJobFile {
    path: PathBuf,
    output: Option<PathBuf>,
    taken: bool,
}

impl LocalJobFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output: None,
            taken: false,
        }
    }

    /// Write the outcome to `path` instead of stdout.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

#[async_trait]
impl JobSource for LocalJobFile {
    async fn next_job(&mut self) -> Result<Option<Job>, QueueError> {
        if self.taken {
            return Ok(None);
        }
        self.taken = true;

        let raw = tokio::fs::read_to_string(&self.path).await?;
        let job: Job = serde_json::from_str::<LocalJob>(&raw)?.into();
        tracing::info!(path = %self.path.display(), job_id = %job.id, "Loaded local job");
        Ok(Some(job))
    }

    async fn submit(&mut self, job_id: &str, outcome: &JobOutcome) -> Result<(), QueueError> {
        let rendered = serde_json::to_string_pretty(outcome)?;
        match &self.output {
            Some(path) => tokio::fs::write(path, rendered).await?,
            None => println!("{rendered}"),
        }
        tracing::info!(job_id, success = outcome.is_success(), "Local job finished");
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.taken
    }
}

// ---------------------------------------------------------------------------
// HTTP job queue
// ---------------------------------------------------------------------------

/// Connection settings for [`HttpJobQueue`].
#[derive(Debug, Clone)]
pub struct HttpQueueConfig {
    /// Take-job URL; `$ID` is replaced with the worker id.
    pub take_url: String,
    /// Post-outcome URL; `$ID` is replaced with the job id.
    pub done_url: String,
    /// Sent verbatim as the `Authorization` header when set.
    pub api_key: Option<String>,
    pub worker_id: String,
}

/// Pulls jobs from an HTTP job queue, one at a time.
///
/// A `204 No Content` or empty body from the take URL means the queue is
/// idle.
pub struct HttpJobQueue {
    client: reqwest::Client,
    config: HttpQueueConfig,
}

impl HttpJobQueue {
    pub fn new(config: HttpQueueConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: HttpQueueConfig) -> Self {
        Self { client, config }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header(reqwest::header::AUTHORIZATION, key),
            None => request,
        }
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, QueueError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Id of a queued job that failed to decode, if one can be read.
///
/// Numeric ids are accepted here so the rejection can still be reported.
fn recover_job_id(raw: &Value) -> Option<String> {
    match raw.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Body posted back to the queue for a finished job.
pub fn outcome_body(outcome: &JobOutcome) -> Value {
    match outcome {
        JobOutcome::Completed(output) => json!({ "output": output }),
        JobOutcome::Failed { error, status_code } => {
            json!({ "error": error, "status_code": status_code })
        }
    }
}

#[async_trait]
impl JobSource for HttpJobQueue {
    async fn next_job(&mut self) -> Result<Option<Job>, QueueError> {
        let url = self
            .config
            .take_url
            .replace(ID_PLACEHOLDER, &self.config.worker_id);

        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = Self::ensure_success(response).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let raw: Value = serde_json::from_str(&body)?;
        let reason = match Job::deserialize(&raw) {
            Ok(job) if !job.id.is_empty() => {
                tracing::info!(job_id = %job.id, "Took job from queue");
                return Ok(Some(job));
            }
            Ok(_) => "job id is empty".to_string(),
            Err(e) => e.to_string(),
        };

        let job_id = recover_job_id(&raw);
        tracing::error!(job_id = ?job_id, reason = %reason, "Rejected malformed job from queue");
        if let Some(id) = &job_id {
            let outcome = JobOutcome::failed(format!("Invalid job: {reason}"), STATUS_BAD_INPUT);
            self.submit(id, &outcome).await?;
        }
        Err(QueueError::InvalidJob { job_id, reason })
    }

    async fn submit(&mut self, job_id: &str, outcome: &JobOutcome) -> Result<(), QueueError> {
        let url = self.config.done_url.replace(ID_PLACEHOLDER, job_id);

        let response = self
            .authorized(self.client.post(&url))
            .json(&outcome_body(outcome))
            .send()
            .await?;
        Self::ensure_success(response).await?;

        tracing::debug!(job_id, success = outcome.is_success(), "Posted job outcome");
        Ok(())
    }
}
