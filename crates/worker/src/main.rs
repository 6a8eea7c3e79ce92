//! `sdw-worker` -- serverless Stable Diffusion job worker.
//!
//! Runs next to an AUTOMATIC1111 WebUI on a GPU worker. Waits for the
//! WebUI API to come up, activates the configured checkpoint, then
//! processes jobs from the configured source one at a time.
//!
//! See [`sdw_worker::config::WorkerConfig::from_env`] for the
//! environment variables. `RUST_LOG` controls log filtering and
//! `LOG_FORMAT=json` switches to JSON log lines.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdw_a1111::checkpoint::set_model_checkpoint;
use sdw_a1111::readiness::{wait_for_service, Readiness};
use sdw_worker::config::WorkerConfig;
use sdw_worker::runner::run_worker;

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdw_worker=info,sdw_a1111=info,sdw_core=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        checkpoint = ?config.checkpoint,
        job_source = config.job_source.kind(),
        "Starting sdw-worker",
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let client = reqwest::Client::new();
    let api = config.build_api(client.clone());

    if let Readiness::Cancelled { .. } = wait_for_service(&api, &config.readiness, &cancel).await {
        return Ok(());
    }

    if let Some(model) = config.checkpoint.as_deref() {
        if let Err(e) = set_model_checkpoint(&api, model, config.checkpoint_settle).await {
            tracing::warn!(
                model,
                error = %e,
                status = ?e.status(),
                "Failed to set SD model checkpoint, continuing with the server's current model",
            );
        }
    }

    tracing::info!("AUTOMATIC1111 setup complete, starting job loop");

    let mut source = config.job_source.into_source(client);
    let stats = run_worker(&api, source.as_mut(), config.poll_interval, &cancel).await;

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        "sdw-worker stopped"
    );
    Ok(())
}
