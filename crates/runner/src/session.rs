//! One invocation of the run pipeline, from planning to summary.
//!
//! ```text
//! prepare:  load suite -> plan            (no filesystem mutation)
//! execute:  recover stale backups -> purge | backup | lab purge
//!           -> engine -> aggregate -> restore | rollback
//! then:     begin_assessment -> summarize -> history
//! ```
//!
//! Only one session may work on a suite's artifact directories at a time.
//! Callers enforce this by sequencing; nothing here takes a lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use vizreg_common::{
    AssessmentSummary, EndpointOutcomes, ProgramChoices, ProjectConfig, RunSummary, SuiteConfig,
    TestType,
};

use crate::aggregator::aggregate;
use crate::assessment::Assessment;
use crate::backup::BackupManager;
use crate::error::{RunError, RunResult};
use crate::events::SessionEvent;
use crate::executor::{self, CaptureEngine, EngineExit, EngineInvocation, EngineRun};
use crate::planner::{self, artifact_identity, ArtifactPolicy, RunPlan, TargetFilters};
use crate::store::ArtifactStore;

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub suite: String,
    pub test_type: TestType,
    #[serde(default)]
    pub filters: TargetFilters,
    #[serde(default)]
    pub gui: bool,
}

impl RunRequest {
    pub fn new(suite: impl Into<String>, test_type: TestType) -> Self {
        Self {
            suite: suite.into(),
            test_type,
            filters: TargetFilters::default(),
            gui: false,
        }
    }

    pub fn with_filters(mut self, filters: TargetFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_gui(mut self, gui: bool) -> Self {
        self.gui = gui;
        self
    }
}

/// Result of [`RunSession::execute`]
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub engine: EngineRun,
    pub outcomes: EndpointOutcomes,
    /// Canonical names on the agenda with a diff once the run settled
    pub test_diff_list: Vec<String>,
    /// Files moved back from the backup area
    pub restored: Vec<String>,
    /// A diffs-only run that was undone, or a run whose engine never started
    pub rolled_back: bool,
    pub failed: bool,
    pub terminated: bool,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn has_diffs(&self) -> bool {
        !self.test_diff_list.is_empty()
    }
}

/// State of a run once its backup window is closed
struct Settled {
    run: EngineRun,
    outcomes: EndpointOutcomes,
    restored: Vec<String>,
    rolled_back: bool,
}

pub struct RunSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    suite: SuiteConfig,
    request: RunRequest,
    plan: RunPlan,
    store: ArtifactStore,
}

impl RunSession {
    /// Load and validate the suite and plan the agenda. Touches nothing on disk.
    pub fn prepare(project: &ProjectConfig, request: RunRequest) -> RunResult<Self> {
        let suite = project.load_suite(&request.suite)?;
        let store = ArtifactStore::for_suite(&project.suite_dir(&suite.name));
        let plan = planner::plan(request.test_type, &suite, &store, &request.filters)?;

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            suite,
            request,
            plan,
            store,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn suite(&self) -> &SuiteConfig {
        &self.suite
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    /// The store this run reads and writes: the lab namespace for lab runs
    pub fn working_store(&self) -> ArtifactStore {
        match self.plan.policy {
            ArtifactPolicy::LabNamespace => self.store.lab(),
            _ => self.store.clone(),
        }
    }

    pub async fn execute(
        &mut self,
        engine: &dyn CaptureEngine,
        cancel: CancellationToken,
        sink: Option<UnboundedSender<SessionEvent>>,
    ) -> RunResult<RunOutcome> {
        let started = Instant::now();
        let backups = BackupManager::new(self.store.clone());

        let recovered = backups.recover_stale()?;
        if !recovered.is_empty() && self.plan.test_type == TestType::DiffsOnly {
            // Recovered diffs belong on the agenda
            self.plan = planner::plan(
                self.request.test_type,
                &self.suite,
                &self.store,
                &self.request.filters,
            )?;
        }

        emit(
            &sink,
            SessionEvent::Started {
                run_id: self.id,
                suite: self.suite.name.clone(),
                test_type: self.plan.test_type,
                agenda: self.plan.agenda.iter().map(|i| i.canonical()).collect(),
            },
        );

        let working = self.working_store();
        match self.plan.policy {
            ArtifactPolicy::Purge | ArtifactPolicy::LabNamespace => {
                let removed = working.purge_diffs_and_received()?;
                info!("Removed {} previous diff/received artifact(s)", removed);
            }
            ArtifactPolicy::Backup => {
                if let Err(e) = backups.backup() {
                    return Err(abandon_window(&backups, e));
                }
            }
        }

        // Nothing may leave the backup window with backups still in place
        let settled = match self.run_and_settle(engine, cancel, &sink, &working, &backups).await {
            Ok(settled) => settled,
            Err(e) if self.plan.policy == ArtifactPolicy::Backup => {
                return Err(abandon_window(&backups, e));
            }
            Err(e) => return Err(e),
        };
        let Settled {
            run,
            outcomes,
            restored,
            rolled_back,
        } = settled;

        if !restored.is_empty() {
            emit(
                &sink,
                SessionEvent::Restored {
                    files: restored.clone(),
                },
            );
        }

        let test_diff_list = working
            .list_diffs()?
            .into_iter()
            .filter(|identity| self.plan.in_scope(identity))
            .map(|identity| identity.canonical())
            .collect();

        let terminated = run.terminated();
        let failed = rolled_back || (!run.exit.is_success() && !terminated);

        info!(
            "Run {} finished: {} passing, {} failing, {} skipped{}{}",
            self.id,
            outcomes.passing.len(),
            outcomes.failing.len(),
            outcomes.skipped.len(),
            if terminated { ", terminated" } else { "" },
            if rolled_back { ", rolled back" } else { "" }
        );

        Ok(RunOutcome {
            engine: run,
            outcomes,
            test_diff_list,
            restored,
            rolled_back,
            failed,
            terminated,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Engine run, aggregation and the restore or rollback that closes the backup window
    async fn run_and_settle(
        &self,
        engine: &dyn CaptureEngine,
        cancel: CancellationToken,
        sink: &Option<UnboundedSender<SessionEvent>>,
        working: &ArtifactStore,
        backups: &BackupManager,
    ) -> RunResult<Settled> {
        working.ensure_dirs()?;

        let invocation = EngineInvocation {
            suite: self.suite.clone(),
            plan: self.plan.clone(),
            snapshots_dir: working.snaps_dir().to_path_buf(),
            gui: self.request.gui,
        };
        let run = executor::execute(engine, &invocation, cancel, sink.clone()).await?;

        // The live diff directory holds only this run's diffs until restore
        let run_diffs = working.list_diffs()?;
        let outcomes = aggregate(&self.plan.agenda, &run, &run_diffs);

        let mut restored = Vec::new();
        let mut rolled_back = false;
        if self.plan.policy == ArtifactPolicy::Backup {
            let spawn_failed = matches!(run.exit, EngineExit::SpawnError(_));
            let must_roll_back = self.plan.rolls_back_on_failure()
                && (!run.exit.is_success() || run.terminated());

            if spawn_failed || must_roll_back {
                warn!(
                    "Rolling back every diff and received artifact for suite '{}'",
                    self.suite.name
                );
                restored = backups.rollback()?;
                rolled_back = true;
            } else {
                // In-scope identities that never ran keep their previous artifacts
                let skipped: HashSet<String> =
                    outcomes.skipped.iter().map(|r| r.test_title.clone()).collect();
                let plan = &self.plan;
                restored = backups.restore(|name| match artifact_identity(name) {
                    Some(identity) => {
                        !plan.in_scope(&identity) || skipped.contains(&identity.canonical())
                    }
                    None => !plan.scope_contains_file(name),
                })?;
                backups.cleanup()?;
            }
        }

        Ok(Settled {
            run,
            outcomes,
            restored,
            rolled_back,
        })
    }

    /// Start reviewing this run's diffs; lab runs have none to review
    pub fn begin_assessment(&self) -> RunResult<Option<Assessment>> {
        if !self.plan.test_type.is_snapshot() {
            return Ok(None);
        }
        let mut assessment = Assessment::new(self.store.clone());
        assessment.begin(Some(&self.plan.agenda))?;
        Ok(Some(assessment))
    }

    pub fn summarize(&self, outcome: &RunOutcome, assessment: Option<AssessmentSummary>) -> RunSummary {
        let failed = outcome.failed || assessment.as_ref().map_or(false, |a| a.failed);

        RunSummary {
            id: self.id,
            test_type: self.plan.test_type,
            suite: self.suite.name.clone(),
            created_at: self.created_at,
            duration_ms: outcome.duration_ms,
            executor_summary: outcome.engine.executor_summary(),
            endpoint_test_results: outcome.outcomes.clone(),
            test_diff_list: outcome.test_diff_list.clone(),
            program_choices: ProgramChoices {
                suite: self.suite.name.clone(),
                test_type: self.plan.test_type,
                target_endpoint_titles: self.request.filters.endpoint_titles.clone(),
                target_viewports: self.request.filters.viewports.clone(),
                gui: self.request.gui,
                snap: self.plan.test_type.is_snapshot(),
            },
            terminated: outcome.terminated,
            failed,
            assessment,
        }
    }
}

/// Roll back after `err` interrupted the backup window and hand `err` back
fn abandon_window(backups: &BackupManager, err: RunError) -> RunError {
    warn!("Run failed inside the backup window ({}); rolling back artifacts", err);
    if let Err(rollback) = backups.rollback() {
        error!(
            "Rollback failed, backups stay in place for the next run to recover: {}",
            rollback
        );
    }
    err
}

fn emit(sink: &Option<UnboundedSender<SessionEvent>>, event: SessionEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
