//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sdw_a1111::api::{A1111Api, DEFAULT_API_URL, DEFAULT_INFERENCE_TIMEOUT};
use sdw_a1111::checkpoint::DEFAULT_SETTLE_DELAY;
use sdw_a1111::readiness::ReadinessConfig;
use sdw_a1111::retry::RetryPolicy;
use sdw_core::error::CoreError;

use crate::queue::{HttpJobQueue, HttpQueueConfig, JobSource, LocalJobFile};
use crate::runner::DEFAULT_POLL_INTERVAL;

/// Checkpoint selected at startup unless overridden.
pub const DEFAULT_CHECKPOINT: &str = "Gemini_ILMixV5.safetensors";

/// Job file used when no job source is configured.
pub const DEFAULT_JOB_FILE: &str = "test_input.json";

/// Where jobs come from.
#[derive(Debug, Clone)]
pub enum JobSourceConfig {
    /// A single job read from a local JSON file.
    LocalFile(PathBuf),
    /// A remote HTTP job queue.
    HttpQueue(HttpQueueConfig),
}

impl JobSourceConfig {
    /// Short label for logs. Never includes credentials.
    pub fn kind(&self) -> &'static str {
        match self {
            JobSourceConfig::LocalFile(_) => "local_file",
            JobSourceConfig::HttpQueue(_) => "http_queue",
        }
    }

    /// Build the configured source, sharing `client` for HTTP queues.
    pub fn into_source(self, client: reqwest::Client) -> Box<dyn JobSource> {
        match self {
            JobSourceConfig::LocalFile(path) => Box::new(LocalJobFile::new(path)),
            JobSourceConfig::HttpQueue(config) => {
                Box::new(HttpJobQueue::with_client(client, config))
            }
        }
    }
}

/// Worker configuration.
///
/// All fields have defaults matching a worker image where the WebUI
/// listens on `127.0.0.1:3000`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Inference API base URL, including `/sdapi/v1`.
    pub api_url: String,
    /// Checkpoint to activate at startup. `None` leaves the server's choice.
    pub checkpoint: Option<String>,
    pub checkpoint_settle: Duration,
    pub readiness: ReadinessConfig,
    pub inference_timeout: Duration,
    pub retry: RetryPolicy,
    pub job_source: JobSourceConfig,
    /// Delay between polls of an idle job source.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `A1111_API_URL`            | `http://127.0.0.1:3000/sdapi/v1` |
    /// | `SD_MODEL_CHECKPOINT`      | `Gemini_ILMixV5.safetensors` (empty disables) |
    /// | `HEALTH_CHECK_INTERVAL_MS` | `500`                            |
    /// | `HEALTH_CHECK_LOG_EVERY`   | `15`                             |
    /// | `CHECKPOINT_SETTLE_MS`     | `1000`                           |
    /// | `INFERENCE_TIMEOUT_SECS`   | `600`                            |
    /// | `HTTP_MAX_RETRIES`         | `15`                             |
    /// | `HTTP_BACKOFF_FACTOR_MS`   | `300`                            |
    /// | `JOB_INPUT_PATH`           | --                               |
    /// | `JOB_TAKE_URL`             | --                               |
    /// | `JOB_DONE_URL`             | --                               |
    /// | `JOB_QUEUE_API_KEY`        | --                               |
    /// | `WORKER_ID`                | random UUID                      |
    /// | `JOB_POLL_INTERVAL_MS`     | `1000`                           |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values behave as unset.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = get("A1111_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let checkpoint = match lookup("SD_MODEL_CHECKPOINT") {
            None => Some(DEFAULT_CHECKPOINT.to_string()),
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
        };

        let readiness_defaults = ReadinessConfig::default();
        let readiness = ReadinessConfig {
            interval: Duration::from_millis(parse_var(
                &get,
                "HEALTH_CHECK_INTERVAL_MS",
                readiness_defaults.interval.as_millis() as u64,
            )?),
            log_every: parse_var(&get, "HEALTH_CHECK_LOG_EVERY", readiness_defaults.log_every)?,
        };

        let checkpoint_settle = Duration::from_millis(parse_var(
            &get,
            "CHECKPOINT_SETTLE_MS",
            DEFAULT_SETTLE_DELAY.as_millis() as u64,
        )?);

        let inference_timeout = Duration::from_secs(parse_var(
            &get,
            "INFERENCE_TIMEOUT_SECS",
            DEFAULT_INFERENCE_TIMEOUT.as_secs(),
        )?);

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_var(&get, "HTTP_MAX_RETRIES", retry_defaults.max_retries)?,
            backoff_factor: Duration::from_millis(parse_var(
                &get,
                "HTTP_BACKOFF_FACTOR_MS",
                retry_defaults.backoff_factor.as_millis() as u64,
            )?),
            ..retry_defaults
        };

        let poll_interval = Duration::from_millis(parse_var(
            &get,
            "JOB_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )?);

        let job_source = match (get("JOB_INPUT_PATH"), get("JOB_TAKE_URL"), get("JOB_DONE_URL")) {
            (Some(path), _, _) => JobSourceConfig::LocalFile(PathBuf::from(path)),
            (None, Some(take_url), Some(done_url)) => JobSourceConfig::HttpQueue(HttpQueueConfig {
                take_url,
                done_url,
                api_key: get("JOB_QUEUE_API_KEY"),
                worker_id: get("WORKER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            }),
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(CoreError::Config(
                    "JOB_TAKE_URL and JOB_DONE_URL must be set together".to_string(),
                ))
            }
            (None, None, None) => JobSourceConfig::LocalFile(PathBuf::from(DEFAULT_JOB_FILE)),
        };

        Ok(Self {
            api_url,
            checkpoint,
            checkpoint_settle,
            readiness,
            inference_timeout,
            retry,
            job_source,
            poll_interval,
        })
    }

    /// Build the inference API client from this configuration.
    pub fn build_api(&self, client: reqwest::Client) -> A1111Api {
        A1111Api::with_client(client, self.api_url.clone())
            .with_retry_policy(self.retry.clone())
            .with_inference_timeout(self.inference_timeout)
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T, G>(get: &G, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::Config(format!("{key} must be a valid number (got '{raw}')"))),
    }
}
