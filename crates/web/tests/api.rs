//! Route tests driven through `oneshot`

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use vizreg_common::{ArtifactRole, ProjectConfig, TestIdentity};
use vizreg_runner::executor::EngineInvocation;
use vizreg_runner::parser::OutputParser;
use vizreg_runner::store::{DIFF_DIR, RECEIVED_DIR};
use vizreg_runner::{CaptureEngine, EngineExit, EngineRecorder, RunResult, SessionEvent};
use vizreg_web::{router, AppState};

const SITE: &str = r#"
viewports = ["iphone-6"]

[[endpoints]]
title = "Start"
path = "/"

[[endpoints]]
title = "Blog"
path = "/blog"
"#;

/// Reports Start as failing with a fresh mismatch and Blog as passing
struct MismatchEngine;

#[async_trait]
impl CaptureEngine for MismatchEngine {
    async fn run(
        &self,
        invocation: &EngineInvocation,
        _cancel: CancellationToken,
        recorder: &mut EngineRecorder,
    ) -> RunResult<EngineExit> {
        let id = TestIdentity::parse("Start @ iphone-6").unwrap();
        let dir = &invocation.snapshots_dir;
        std::fs::write(dir.join(DIFF_DIR).join(id.file_name(ArtifactRole::Diff)), b"d")?;
        std::fs::write(dir.join(RECEIVED_DIR).join(id.file_name(ArtifactRole::Received)), b"r")?;

        let mut parser = OutputParser::new("site");
        recorder.line(&mut parser, "  ✓ Blog @ iphone-6 (20ms)".into());
        recorder.line(&mut parser, "  1) site Start @ iphone-6: Image was 2% different".into());
        Ok(EngineExit::Failure(Some(1)))
    }
}

fn setup() -> (TempDir, Arc<AppState>) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("suites/site");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("suite.toml"), SITE).unwrap();
    let project = ProjectConfig::load(tmp.path()).unwrap();
    let state = AppState::new(project, Arc::new(MismatchEngine));
    (tmp, state)
}

fn seed(tmp: &TempDir, name: &str) {
    let snaps = tmp.path().join("suites/site/snapshots/snaps");
    let id = TestIdentity::parse(name).unwrap();
    std::fs::create_dir_all(snaps.join(DIFF_DIR)).unwrap();
    std::fs::create_dir_all(snaps.join(RECEIVED_DIR)).unwrap();
    std::fs::write(snaps.join(DIFF_DIR).join(id.file_name(ArtifactRole::Diff)), b"diff").unwrap();
    std::fs::write(
        snaps.join(RECEIVED_DIR).join(id.file_name(ArtifactRole::Received)),
        b"received",
    )
    .unwrap();
    std::fs::write(snaps.join(id.file_name(ArtifactRole::Baseline)), b"base").unwrap();
}

async fn call(
    state: &Arc<AppState>,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_and_suites() {
    let (_tmp, state) = setup();

    let (status, body) = call(&state, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&state, Method::GET, "/api/suites", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["site"]));
}

#[tokio::test]
async fn test_start_run_validation() {
    let (_tmp, state) = setup();

    let (status, _) = call(
        &state,
        Method::POST,
        "/api/runs",
        Some(serde_json::json!({ "suite": "nope", "test_type": "full-test" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &state,
        Method::POST,
        "/api/runs",
        Some(serde_json::json!({ "suite": "site", "test_type": "targeted" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("at least one"));

    let (status, _) = call(&state, Method::GET, "/api/suites/site/summary", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_assessment_flow_rejects_stale_decisions() {
    let (tmp, state) = setup();
    seed(&tmp, "Blog @ iphone-6");
    seed(&tmp, "Start @ iphone-6");

    let (status, body) = call(&state, Method::GET, "/api/suites/site/diffs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["diffs"].as_array().unwrap().len(), 2);
    assert!(body["assessment"].is_null());
    let diff_url = body["diffs"][0]["diff_url"].as_str().unwrap().to_string();
    assert_eq!(
        diff_url,
        "/artifacts/site/snapshots/snaps/__diff_output__/Blog%20%40%20iphone-6.diff.png"
    );

    let request = Request::builder().uri(&diff_url).body(Body::empty()).unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"diff");

    let (status, body) = call(&state, Method::POST, "/api/suites/site/assessment", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "assessing");
    assert_eq!(body["current"], 0);

    let (status, _) = call(
        &state,
        Method::POST,
        "/api/suites/site/assessment/items/1/approve",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &state,
        Method::POST,
        "/api/suites/site/assessment/items/0/approve",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], 1);
    assert_eq!(body["approved_files"], serde_json::json!(["Blog @ iphone-6"]));

    let (status, _) = call(
        &state,
        Method::POST,
        "/api/suites/site/assessment/items/0/approve",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &state,
        Method::POST,
        "/api/suites/site/assessment/items/1/reject",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "summarized");
    assert_eq!(body["rejected_files"], serde_json::json!(["Start @ iphone-6"]));

    let baseline = tmp
        .path()
        .join("suites/site/snapshots/snaps/Blog @ iphone-6.base.png");
    assert_eq!(std::fs::read(baseline).unwrap(), b"received");
}

#[tokio::test]
async fn test_run_streams_events_and_records_summary() {
    let (_tmp, state) = setup();
    let mut events = state.subscribe();

    let (status, body) = call(
        &state,
        Method::POST,
        "/api/runs",
        Some(serde_json::json!({ "suite": "site", "test_type": "full-test" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        body["agenda"],
        serde_json::json!(["Start @ iphone-6", "Blog @ iphone-6"])
    );

    let summary = tokio::time::timeout(Duration::from_secs(10), async {
        let mut saw_failing = false;
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::Failing { test_title, .. } => {
                    saw_failing = test_title == "Start @ iphone-6";
                }
                SessionEvent::Summary { summary } => {
                    assert!(saw_failing);
                    return summary;
                }
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert!(summary.failed);
    assert_eq!(summary.test_diff_list, vec!["Start @ iphone-6"]);
    assert_eq!(summary.endpoint_test_results.unchanged.len(), 1);

    let (status, body) = call(&state, Method::GET, "/api/suites/site/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], summary.id.to_string());

    // The run left its diff queued for review
    let (status, body) = call(&state, Method::GET, "/api/suites/site/assessment", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["test_title"], "Start @ iphone-6");

    let (status, body) = call(
        &state,
        Method::POST,
        "/api/suites/site/assessment/approve-all",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "summarized");

    let (status, body) = call(&state, Method::GET, "/api/suites/site/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["assessment"]["approved_files"],
        serde_json::json!(["Start @ iphone-6"])
    );

    let (status, body) = call(&state, Method::GET, "/api/history?suite=site", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&state, Method::POST, "/api/runs/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["stopped"].is_boolean());
}
