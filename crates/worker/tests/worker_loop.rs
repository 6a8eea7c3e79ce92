//! Integration tests for job sources and the worker loop.
//!
//! A mock server plays both roles: the AUTOMATIC1111 API under
//! `/sdapi/v1` and the job queue under `/queue`.

use std::time::Duration;

use assert_matches::assert_matches;
use sdw_a1111::api::A1111Api;
use sdw_a1111::retry::RetryPolicy;
use sdw_worker::handler::JobOutcome;
use sdw_worker::queue::{HttpJobQueue, HttpQueueConfig, JobSource, LocalJobFile, QueueError};
use sdw_worker::runner::{run_worker, WorkerStats};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POLL: Duration = Duration::from_millis(5);

fn api_for(server: &MockServer) -> A1111Api {
    A1111Api::new(format!("{}/sdapi/v1", server.uri())).with_retry_policy(RetryPolicy::none())
}

fn queue_for(server: &MockServer) -> HttpJobQueue {
    HttpJobQueue::new(HttpQueueConfig {
        take_url: format!("{}/queue/take/$ID", server.uri()),
        done_url: format!("{}/queue/done/$ID", server.uri()),
        api_key: Some("test-key".into()),
        worker_id: "worker-1".into(),
    })
}

// ---------------------------------------------------------------------------
// Local job file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_job_file_runs_once_and_writes_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": ["abc"]})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("test_input.json");
    let output = dir.path().join("output.json");
    std::fs::write(&input, r#"{"input": {"prompt": "a lighthouse"}}"#).unwrap();

    let mut source = LocalJobFile::new(&input).with_output(&output);
    let stats = run_worker(&api_for(&server), &mut source, POLL, &CancellationToken::new()).await;

    assert_eq!(
        stats,
        WorkerStats {
            completed: 1,
            failed: 0,
            undelivered: 0
        }
    );
    assert!(source.is_exhausted());

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written, json!({"images": ["abc"]}));
}

#[tokio::test]
async fn local_job_file_failure_is_written_as_error() {
    let server = MockServer::start().await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("job.json");
    let output = dir.path().join("out.json");
    std::fs::write(&input, r#"{"id": "j1", "input": [1, 2, 3]}"#).unwrap();

    let mut source = LocalJobFile::new(&input).with_output(&output);
    let stats = run_worker(&api_for(&server), &mut source, POLL, &CancellationToken::new()).await;

    assert_eq!(stats.failed, 1);
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["status_code"], 400);
}

#[tokio::test]
async fn missing_local_job_file_ends_loop() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut source = LocalJobFile::new(dir.path().join("nope.json"));
    let err = source.next_job().await.unwrap_err();
    assert_matches!(err, QueueError::Io(_));

    let mut source = LocalJobFile::new(dir.path().join("nope.json"));
    let stats = run_worker(&api_for(&server), &mut source, POLL, &CancellationToken::new()).await;
    assert_eq!(stats, WorkerStats::default());
}

// ---------------------------------------------------------------------------
// HTTP job queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_queue_idle_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .and(header("authorization", "test-key"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut queue = queue_for(&server);
    assert_eq!(queue.next_job().await.unwrap(), None);
    assert!(!queue.is_exhausted());
}

#[tokio::test]
async fn http_queue_error_status_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = queue_for(&server).next_job().await.unwrap_err();
    assert_matches!(err, QueueError::Status { status: 401, ref body } if body == "bad key");
}

#[tokio::test]
async fn http_queue_round_trip_through_worker() {
    let server = MockServer::start().await;

    // One job, then the queue goes idle.
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "job-42",
            "input": {"prompt": "forest", "loras": [{"name": "moss", "weight": 0.9}]},
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": ["img"]})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/queue/done/job-42"))
        .and(header("authorization", "test-key"))
        .and(body_json(json!({"output": {"images": ["img"]}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let mut queue = queue_for(&server);
    let stats = run_worker(&api_for(&server), &mut queue, POLL, &cancel).await;

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.undelivered, 0);

    let received = server.received_requests().await.unwrap();
    let inference = received
        .iter()
        .find(|r| r.url.path() == "/sdapi/v1/txt2img")
        .expect("inference request sent");
    let sent: Value = serde_json::from_slice(&inference.body).unwrap();
    assert_eq!(sent["prompt"], "forest <lora:moss:0.9>");
}

#[tokio::test]
async fn queued_job_without_id_is_rejected_not_defaulted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"input": {"prompt": "p"}})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/queue/done/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = queue_for(&server).next_job().await.unwrap_err();
    assert_matches!(err, QueueError::InvalidJob { job_id: None, .. });
}

#[tokio::test]
async fn queued_job_with_numeric_id_gets_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 7, "input": {"prompt": "p"}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/queue/done/7"))
        .and(body_partial_json(json!({"status_code": 400})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let stats = run_worker(&api_for(&server), &mut queue_for(&server), POLL, &cancel).await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn failed_job_posted_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queue/done/job-7"))
        .and(body_json(json!({"error": "AUTOMATIC1111 API Request Error: x", "status_code": 503})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut queue = queue_for(&server);
    queue
        .submit(
            "job-7",
            &JobOutcome::failed("AUTOMATIC1111 API Request Error: x", 503),
        )
        .await
        .expect("post should succeed");
}

#[tokio::test]
async fn undeliverable_outcome_is_counted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "j", "input": {}})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/take/worker-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/queue/done/j"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let stats = run_worker(&api_for(&server), &mut queue_for(&server), POLL, &cancel).await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.undelivered, 1);
}
