//! Web server implementation

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use vizreg_common::{ArtifactRole, TestIdentity, TestType};
use vizreg_runner::store::{DIFF_DIR, RECEIVED_DIR, SNAPS_SUBDIR};
use vizreg_runner::{
    Assessment, AssessmentItem, AssessmentState, ArtifactStore, RunError, RunRequest, TargetFilters,
};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, RunStarted};

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub suite: String,
    pub test_type: TestType,
    #[serde(default)]
    pub target_endpoint_titles: Vec<String>,
    #[serde(default)]
    pub target_viewports: Vec<String>,
    #[serde(default)]
    pub gui: bool,
}

impl From<StartRunRequest> for RunRequest {
    fn from(req: StartRunRequest) -> Self {
        RunRequest::new(req.suite, req.test_type).with_filters(TargetFilters::new(
            req.target_endpoint_titles,
            req.target_viewports,
        ))
        .with_gui(req.gui)
    }
}

/// One diff artifact with links to its three images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub test_title: String,
    pub endpoint_title: String,
    pub viewport: String,
    pub diff_url: String,
    pub received_url: Option<String>,
    pub baseline_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentView {
    pub suite: String,
    pub state: AssessmentState,
    pub current: Option<usize>,
    pub items: Vec<AssessmentItem>,
    pub approved_files: Vec<String>,
    pub rejected_files: Vec<String>,
    pub failed: bool,
}

impl AssessmentView {
    fn of(suite: &str, assessment: &Assessment) -> Self {
        let summary = assessment.summary();
        Self {
            suite: suite.to_string(),
            state: assessment.state(),
            current: assessment.current_index(),
            items: assessment.items().to_vec(),
            approved_files: summary.approved_files,
            rejected_files: summary.rejected_files,
            failed: summary.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffsData {
    pub suite: String,
    pub diffs: Vec<DiffEntry>,
    pub assessment: Option<AssessmentView>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub suite: Option<String>,
    pub limit: Option<usize>,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let artifacts = ServeDir::new(state.project().suites_dir());

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/suites", get(list_suites_handler))
        .route("/api/runs", post(start_run_handler))
        .route("/api/runs/stop", post(stop_run_handler))
        .route("/api/history", get(history_handler))
        .route("/api/suites/:suite/diffs", get(diffs_handler))
        .route("/api/suites/:suite/summary", get(summary_handler))
        .route("/api/suites/:suite/assessment", get(get_assessment_handler).post(begin_assessment_handler))
        .route("/api/suites/:suite/assessment/approve-all", post(approve_all_handler))
        .route("/api/suites/:suite/assessment/cancel", post(cancel_assessment_handler))
        .route("/api/suites/:suite/assessment/items/:index/approve", post(approve_handler))
        .route("/api/suites/:suite/assessment/items/:index/reject", post(reject_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/artifacts", artifacts)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process stops
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    info!(
        "vizreg web listening on http://{} (project {})",
        addr,
        state.project().root.display()
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vizreg-web",
        "version": vizreg_common::VERSION,
    }))
}

async fn list_suites_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.project().suite_names()?))
}

async fn start_run_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult<(StatusCode, Json<RunStarted>)> {
    let started = state.start_run(req.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn stop_run_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stopped = state.stop_run().await;
    Json(serde_json::json!({ "stopped": stopped }))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Response> {
    let entries = state
        .history()
        .list(query.suite.as_deref(), query.limit)
        .map_err(ApiError::from)?;
    Ok(Json(entries).into_response())
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Response> {
    match state.last_summary(&suite).await? {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Err(ApiError::NotFound(format!("no runs recorded for suite '{}'", suite))),
    }
}

fn suite_store(state: &AppState, suite: &str) -> ApiResult<ArtifactStore> {
    // Loading validates the name and proves the suite exists
    state.project().load_suite(suite)?;
    Ok(ArtifactStore::for_suite(&state.project().suite_dir(suite)))
}

fn artifact_url(suite: &str, dir: Option<&str>, file: &str) -> String {
    let mut segments = vec![suite.to_string()];
    segments.extend(SNAPS_SUBDIR.split('/').map(String::from));
    segments.extend(dir.map(String::from));
    segments.push(file.to_string());

    let encoded: Vec<String> = segments
        .iter()
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!("/artifacts/{}", encoded.join("/"))
}

fn diff_entry(suite: &str, store: &ArtifactStore, identity: &TestIdentity) -> DiffEntry {
    let exists = |role| store.path(identity, role).is_file();
    DiffEntry {
        test_title: identity.canonical(),
        endpoint_title: identity.endpoint_title.clone(),
        viewport: identity.viewport.canonical(),
        diff_url: artifact_url(suite, Some(DIFF_DIR), &identity.file_name(ArtifactRole::Diff)),
        received_url: exists(ArtifactRole::Received).then(|| {
            artifact_url(suite, Some(RECEIVED_DIR), &identity.file_name(ArtifactRole::Received))
        }),
        baseline_url: exists(ArtifactRole::Baseline)
            .then(|| artifact_url(suite, None, &identity.file_name(ArtifactRole::Baseline))),
    }
}

async fn diffs_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Json<DiffsData>> {
    let store = suite_store(&state, &suite)?;
    let diffs = store
        .list_diffs()?
        .iter()
        .map(|identity| diff_entry(&suite, &store, identity))
        .collect();

    let assessment = state
        .assessments
        .lock()
        .await
        .get(&suite)
        .map(|a| AssessmentView::of(&suite, a));

    Ok(Json(DiffsData {
        suite,
        diffs,
        assessment,
    }))
}

async fn get_assessment_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Json<AssessmentView>> {
    let assessments = state.assessments.lock().await;
    let assessment = assessments.get(&suite).ok_or(RunError::NotAssessing)?;
    Ok(Json(AssessmentView::of(&suite, assessment)))
}

async fn begin_assessment_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Json<AssessmentView>> {
    if state.active_suite().await.as_deref() == Some(suite.as_str()) {
        return Err(RunError::AlreadyRunning(suite).into());
    }
    let store = suite_store(&state, &suite)?;

    let mut assessment = Assessment::new(store);
    assessment.begin(None)?;
    let view = AssessmentView::of(&suite, &assessment);

    state.assessments.lock().await.insert(suite, assessment);
    Ok(Json(view))
}

/// Apply `decide` to the suite's assessment under the lock
async fn decide<F>(state: &AppState, suite: &str, decide: F) -> ApiResult<Json<AssessmentView>>
where
    F: FnOnce(&mut Assessment) -> Result<(), RunError>,
{
    let mut assessments = state.assessments.lock().await;
    let assessment = assessments.get_mut(suite).ok_or(RunError::NotAssessing)?;

    let was_assessing = assessment.state() == AssessmentState::Assessing;
    let result = decide(assessment);
    let view = AssessmentView::of(suite, assessment);
    let finished = was_assessing && assessment.state() == AssessmentState::Summarized;
    let summary = assessment.summary();
    drop(assessments);

    if finished {
        state.assessment_finished(suite, summary).await;
    }

    result?;
    Ok(Json(view))
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    Path((suite, index)): Path<(String, usize)>,
) -> ApiResult<Json<AssessmentView>> {
    debug!("approve {} #{}", suite, index);
    decide(&state, &suite, |a| a.approve(index).map(|_| ())).await
}

async fn reject_handler(
    State(state): State<Arc<AppState>>,
    Path((suite, index)): Path<(String, usize)>,
) -> ApiResult<Json<AssessmentView>> {
    debug!("reject {} #{}", suite, index);
    decide(&state, &suite, |a| a.reject(index).map(|_| ())).await
}

async fn approve_all_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Json<AssessmentView>> {
    decide(&state, &suite, |a| a.approve_all().map(|_| ())).await
}

async fn cancel_assessment_handler(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
) -> ApiResult<Json<AssessmentView>> {
    decide(&state, &suite, |a| {
        a.cancel();
        Ok(())
    })
    .await
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.subscribe();
    debug!("Event stream client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream client lagged; skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Event stream client disconnected");
}
