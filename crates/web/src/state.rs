//! Shared server state: the active run, per-suite assessments and the event fan-out

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use vizreg_common::{AssessmentSummary, ProjectConfig, RunSummary, TestType};
use vizreg_runner::{
    Assessment, AssessmentState, CaptureEngine, RunError, RunHistory, RunRequest, RunResult,
    RunSession, SessionEvent,
};

/// Slow WebSocket clients lag (and skip events) past this many buffered events
const EVENT_BUFFER: usize = 1024;

struct ActiveRun {
    run_id: Uuid,
    suite: String,
    cancel: CancellationToken,
}

/// Returned when a run is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStarted {
    pub run_id: Uuid,
    pub suite: String,
    pub test_type: TestType,
    pub agenda: Vec<String>,
}

pub struct AppState {
    project: ProjectConfig,
    engine: Arc<dyn CaptureEngine>,
    history: RunHistory,
    events: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<ActiveRun>>,
    /// One assessment per suite; the mutex serializes competing clients
    pub(crate) assessments: Mutex<HashMap<String, Assessment>>,
    summaries: RwLock<HashMap<String, RunSummary>>,
}

impl AppState {
    pub fn new(project: ProjectConfig, engine: Arc<dyn CaptureEngine>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            history: RunHistory::for_project(&project),
            project,
            engine,
            events,
            active: Mutex::new(None),
            assessments: Mutex::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
        })
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn active_suite(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|r| r.suite.clone())
    }

    /// Validate and plan `request`, then run it in the background
    pub async fn start_run(self: &Arc<Self>, request: RunRequest) -> RunResult<RunStarted> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            return Err(RunError::AlreadyRunning(run.suite.clone()));
        }

        let session = RunSession::prepare(&self.project, request)?;
        let suite = session.suite().name.clone();

        if let Some(mut previous) = self.assessments.lock().await.remove(&suite) {
            if previous.state() == AssessmentState::Assessing {
                warn!("Abandoning assessment of suite '{}' for a new run", suite);
            }
            previous.cancel();
        }

        let started = RunStarted {
            run_id: session.id(),
            suite: suite.clone(),
            test_type: session.plan().test_type,
            agenda: session.plan().agenda.iter().map(|i| i.canonical()).collect(),
        };

        let cancel = CancellationToken::new();
        *active = Some(ActiveRun {
            run_id: session.id(),
            suite,
            cancel: cancel.clone(),
        });
        drop(active);

        info!("Accepted run {} for suite '{}'", started.run_id, started.suite);
        let state = Arc::clone(self);
        tokio::spawn(async move { state.drive(session, cancel).await });

        Ok(started)
    }

    /// Cancel the active run; returns false when nothing was running
    pub async fn stop_run(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(run) => {
                info!("Stopping run {}", run.run_id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn drive(self: Arc<Self>, mut session: RunSession, cancel: CancellationToken) {
        let suite = session.suite().name.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = events.send(event);
            }
        });

        let result = session.execute(self.engine.as_ref(), cancel, Some(tx)).await;
        // The sender was moved into execute, so the forwarder drains and stops
        let _ = forward.await;

        match result {
            Ok(outcome) => {
                match session.begin_assessment() {
                    Ok(Some(assessment)) if assessment.state() == AssessmentState::Assessing => {
                        self.assessments.lock().await.insert(suite.clone(), assessment);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not start assessment for suite '{}': {}", suite, e),
                }

                let summary = session.summarize(&outcome, None);
                if let Err(e) = self.history.record(&summary) {
                    error!("Failed to record run history: {}", e);
                }
                self.summaries.write().await.insert(suite, summary.clone());
                self.publish(SessionEvent::Summary {
                    summary: Box::new(summary),
                });
            }
            Err(e) => {
                error!("Run for suite '{}' failed: {}", suite, e);
                self.publish(SessionEvent::Raw {
                    text: format!("Run failed: {}", e),
                });
            }
        }

        *self.active.lock().await = None;
    }

    /// Attach a finished assessment to the suite's latest summary and announce it
    pub(crate) async fn assessment_finished(&self, suite: &str, summary: AssessmentSummary) {
        if let Some(latest) = self.summaries.write().await.get_mut(suite) {
            latest.failed |= summary.failed;
            latest.assessment = Some(summary.clone());
        }
        self.publish(SessionEvent::Assessment { summary });
    }

    /// Latest summary for `suite`, from this server's runs or the history file
    pub async fn last_summary(&self, suite: &str) -> RunResult<Option<RunSummary>> {
        if let Some(summary) = self.summaries.read().await.get(suite) {
            return Ok(Some(summary.clone()));
        }
        self.history.latest(suite)
    }
}
