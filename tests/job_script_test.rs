use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use finetune_gateway::config::GatewayConfig;
use finetune_gateway::infrastructure::memory_remote::{FailureMode, InMemoryRemote};
use finetune_gateway::services::notification::LogNotifier;
use finetune_gateway::{AppState, create_app};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_app(staging: &Path, remote: &InMemoryRemote) -> axum::Router {
    let mut config = GatewayConfig::development();
    config.staging_dir = staging.to_path_buf();
    config.remote.script_dir = "/cluster/scripts".to_string();
    config.job.login_host = "login.cluster.test".to_string();

    create_app(AppState::new(
        config,
        Arc::new(remote.clone()),
        Arc::new(LogNotifier),
        CancellationToken::new(),
    ))
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

fn form_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/UploadJobScript")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn staging_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_job_script_from_form() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    let app = test_app(staging.path(), &remote);

    let (status, body) = send(
        app,
        form_request("memory=32&gpus=2&time=02:00:00&nodes=1"),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["message"], "Script uploaded successfully");

    let port = body["port"].as_u64().unwrap();
    assert!((7800..=7899).contains(&port));

    let script_path = body["scriptPath"].as_str().unwrap();
    assert!(script_path.starts_with("/cluster/scripts/llama_job_"));
    assert!(script_path.ends_with(".sh"));

    let script = String::from_utf8(remote.file(script_path).unwrap()).unwrap();
    assert!(script.contains("#SBATCH --ntasks-per-node=8\n"));
    assert!(script.contains("#SBATCH --mem=32G\n"));
    assert!(script.contains("#SBATCH --time=02:00:00\n"));
    assert!(script.contains(&format!("export PORT={}\n", port)));
    assert!(script.contains(&format!(
        "ssh -L 0.0.0.0:{port}:$node:{port} $USER@login.cluster.test"
    )));

    assert_eq!(remote.commands(), vec![format!("chmod 755 '{}'", script_path)]);
    assert!(staging_is_empty(staging.path()));
}

#[tokio::test]
async fn test_job_script_defaults_without_body() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    let app = test_app(staging.path(), &remote);

    let request = Request::builder()
        .method("POST")
        .uri("/UploadJobScript")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    let script = String::from_utf8(remote.file(body["scriptPath"].as_str().unwrap()).unwrap())
        .unwrap();
    assert!(script.contains("#SBATCH -N 1\n"));
    assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
    assert!(script.contains("#SBATCH --mem=16G\n"));
    assert!(script.contains("#SBATCH --time=00:30:00\n"));
}

#[tokio::test]
async fn test_job_script_from_multipart() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    let app = test_app(staging.path(), &remote);

    let boundary = "X-JOB-BOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"gpus\"\r\n\r\n\
         4\r\n\
         --{boundary}--\r\n",
        boundary = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/UploadJobScript")
        .header("Content-Type", format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let script = String::from_utf8(remote.file(body["scriptPath"].as_str().unwrap()).unwrap())
        .unwrap();
    assert!(script.contains("#SBATCH --ntasks-per-node=16\n"));
    assert!(script.contains("#SBATCH --gres=gpu:4\n"));
}

#[tokio::test]
async fn test_non_numeric_gpus_is_bad_request() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    let app = test_app(staging.path(), &remote);

    let (status, body) = send(app, form_request("gpus=two")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("gpus"));
    assert_eq!(remote.connect_count(), 0);
    assert!(staging_is_empty(staging.path()));
}

#[tokio::test]
async fn test_malformed_wall_time_is_bad_request() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    let app = test_app(staging.path(), &remote);

    let (status, _) = send(app, form_request("time=half-an-hour")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chmod_failure_is_server_error() {
    let staging = tempfile::tempdir().unwrap();
    let remote = InMemoryRemote::new();
    remote.fail_with(FailureMode::Exec);
    let app = test_app(staging.path(), &remote);

    let (status, body) = send(app, form_request("gpus=1")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("chmod"));
    assert!(staging_is_empty(staging.path()));
    assert_eq!(remote.open_sessions(), 0);
}
