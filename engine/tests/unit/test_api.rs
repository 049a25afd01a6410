//! HTTP API tests against the router

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;

use jarsmith::server::serve::router;
use jarsmith::server::state::ServerState;
use jarsmith::store::JobStore;
use jobs_api::{CancelResponse, JobStatusResponse, LogsResponse, SubmitJobResponse};

use crate::support::{Engine, MemoryRepository, RecordingTransport, TransportMode};

async fn app() -> (Engine, Router) {
    let engine = Engine::running(
        MemoryRepository::shop(),
        RecordingTransport::new(TransportMode::Accept, Duration::ZERO),
    )
    .await;
    let state = ServerState::new(engine.orchestrator.clone(), engine.settings.clone());
    let router = router(Arc::new(state));
    (engine, router)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

fn submit_body(head: &str) -> Value {
    json!({
        "project_id": "shop",
        "branch": "main",
        "version": "2.1.0",
        "strategy": "diff",
        "base_commit": "a1",
        "head_commit": head,
    })
}

#[tokio::test]
async fn test_health() {
    let (_engine, router) = app().await;
    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = parse(&body);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_submit_poll_and_read_logs() {
    let (_engine, router) = app().await;

    let (status, body) = send(&router, with_json("POST", "/jobs", submit_body("b2"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let submitted: SubmitJobResponse = parse(&body);
    assert_eq!(submitted.state, "queued");

    let uri = format!("/jobs/{}", submitted.job_id);
    let job = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (_, body) = send(&router, get(&uri)).await;
            let job: JobStatusResponse = parse(&body);
            if job.state == "succeeded" || job.state == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(job.state, "succeeded");
    assert_eq!(job.progress, 100);
    assert!(job.archive_location.is_some());

    let (status, body) = send(&router, get(&format!("{}/logs", uri))).await;
    assert_eq!(status, StatusCode::OK);
    let logs: LogsResponse = parse(&body);
    assert!(logs.terminal);
    assert_eq!(logs.next_since, logs.lines.last().unwrap().seq);

    let (_, body) = send(&router, get(&format!("{}/logs?since={}", uri, logs.next_since))).await;
    let tail: LogsResponse = parse(&body);
    assert!(tail.lines.is_empty());
    assert_eq!(tail.next_since, logs.next_since);

    let cancel_uri = format!("{}/cancel", uri);
    let (status, body) = send(&router, with_json("POST", &cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let cancel: CancelResponse = parse(&body);
    assert_eq!(cancel.outcome, "finished");
}

#[tokio::test]
async fn test_invalid_submission_is_bad_request() {
    let (engine, router) = app().await;

    let mut body = submit_body("b2");
    body["strategy"] = json!("partial");
    let (status, body) = send(&router, with_json("POST", "/jobs", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = parse(&body);
    assert_eq!(error["kind"], "Validation");

    assert!(engine.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (_engine, router) = app().await;
    let (status, body) = send(&router, get("/jobs/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = parse(&body);
    assert_eq!(error["kind"], "NotFound");
}

#[tokio::test]
async fn test_settings_require_current_version() {
    let (_engine, router) = app().await;

    let (status, body) = send(&router, get("/settings")).await;
    assert_eq!(status, StatusCode::OK);
    let mut current: Value = parse(&body);
    assert_eq!(current["version"], 1);

    current["settings"]["pipeline"]["max_changed_files"] = json!(10);
    let update = json!({ "version": 1, "settings": current["settings"].clone() });
    let (status, body) = send(&router, with_json("PUT", "/settings", update.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let updated: Value = parse(&body);
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["settings"]["pipeline"]["max_changed_files"], 10);
    assert_eq!(updated["restart_required"], json!([]));

    // A second writer still holding version 1 loses
    let (status, body) = send(&router, with_json("PUT", "/settings", update)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: Value = parse(&body);
    assert_eq!(error["kind"], "VersionConflict");

    let mut settings = updated["settings"].clone();
    settings["server"]["port"] = json!(9191);
    let update = json!({ "version": 2, "settings": settings });
    let (status, body) = send(&router, with_json("PUT", "/settings", update)).await;
    assert_eq!(status, StatusCode::OK);
    let updated: Value = parse(&body);
    assert_eq!(updated["version"], 3);
    assert_eq!(updated["restart_required"], json!(["server.port"]));
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let (_engine, router) = app().await;

    let (_, body) = send(&router, get("/settings")).await;
    let mut current: Value = parse(&body);
    current["settings"]["pipeline"]["worker_pool_size"] = json!(0);
    let update = json!({ "version": 1, "settings": current["settings"].clone() });

    let (status, _) = send(&router, with_json("PUT", "/settings", update)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
