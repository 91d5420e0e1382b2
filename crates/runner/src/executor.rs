//! Capture engine adapter
//!
//! The engine is an external process. It receives the planned agenda through
//! a JSON run descriptor plus a handful of `VIZREG_*` environment variables,
//! and reports results on stdout, which is classified line by line by
//! [`OutputParser`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vizreg_common::{CaptureMode, ExecutorSummary, Padding, SuiteConfig, Viewport};

use crate::error::RunResult;
use crate::events::{ExecutorEvent, SessionEvent};
use crate::parser::{EngineTally, OutputParser};
use crate::planner::RunPlan;

/// How the engine process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineExit {
    Success,
    /// Non-zero exit; `None` when the process was killed by a signal
    Failure(Option<i32>),
    /// The process could not be started at all
    SpawnError(String),
}

impl EngineExit {
    pub fn is_success(&self) -> bool {
        matches!(self, EngineExit::Success)
    }
}

/// A failure reported by the engine for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub test_title: String,
    pub error_message: String,
}

/// Everything gathered from one engine run, including partial results
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub exit: EngineExit,
    /// Canonical names reported passing, in report order
    pub passing: Vec<String>,
    pub failing: Vec<FailureReport>,
    /// The engine reported a hook failure caused by the user stopping it
    pub user_terminated: bool,
    /// The run was cancelled through its token
    pub cancelled: bool,
    pub tally: EngineTally,
    pub duration: Duration,
}

impl EngineRun {
    pub fn terminated(&self) -> bool {
        self.user_terminated || self.cancelled
    }

    /// Engine-reported counts where present, otherwise counts of parsed events
    pub fn executor_summary(&self) -> ExecutorSummary {
        let passing = self
            .tally
            .passing
            .unwrap_or_else(|| self.passing.iter().collect::<HashSet<_>>().len());
        let failing = self.tally.failing.unwrap_or_else(|| {
            self.failing
                .iter()
                .map(|f| f.test_title.as_str())
                .collect::<HashSet<_>>()
                .len()
        });
        let pending = self.tally.pending.unwrap_or(0);

        ExecutorSummary {
            tests: passing + failing + pending,
            passing,
            failing,
            pending,
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// Collects classified events and forwards them to an optional live consumer
pub struct EngineRecorder {
    sink: Option<UnboundedSender<SessionEvent>>,
    passing: Vec<String>,
    failing: Vec<FailureReport>,
    user_terminated: bool,
    tally: EngineTally,
}

impl EngineRecorder {
    pub fn new(sink: Option<UnboundedSender<SessionEvent>>) -> Self {
        Self {
            sink,
            passing: Vec::new(),
            failing: Vec::new(),
            user_terminated: false,
            tally: EngineTally::default(),
        }
    }

    pub fn emit(&mut self, event: ExecutorEvent) {
        match &event {
            ExecutorEvent::Passing { test_title } => {
                debug!("passing: {}", test_title);
                self.passing.push(test_title.clone());
            }
            ExecutorEvent::Failing {
                test_title,
                error_message,
            } => {
                debug!("failing: {} ({})", test_title, error_message);
                self.failing.push(FailureReport {
                    test_title: test_title.clone(),
                    error_message: error_message.clone(),
                });
            }
            ExecutorEvent::UserTerminated => {
                info!("Engine reports the run was stopped by the user");
                self.user_terminated = true;
            }
            ExecutorEvent::Raw { .. } => {}
        }

        if let Some(sink) = &self.sink {
            // A consumer that went away does not stop the run
            let _ = sink.send(event.into());
        }
    }

    /// Forward one raw line and whatever `parser` makes of it
    pub fn line(&mut self, parser: &mut OutputParser, text: String) {
        let classified = parser.feed(&text);
        self.emit(ExecutorEvent::Raw { text });
        if let Some(event) = classified {
            self.emit(event);
        }
    }

    pub fn set_tally(&mut self, tally: EngineTally) {
        self.tally = tally;
    }

    fn finish(self, exit: EngineExit, cancelled: bool, duration: Duration) -> EngineRun {
        EngineRun {
            exit,
            passing: self.passing,
            failing: self.failing,
            user_terminated: self.user_terminated,
            cancelled,
            tally: self.tally,
            duration,
        }
    }
}

/// What the engine is asked to do
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub suite: SuiteConfig,
    pub plan: RunPlan,
    /// Where baselines are read and written; the lab namespace for lab runs
    pub snapshots_dir: PathBuf,
    pub gui: bool,
}

/// One agenda entry as the engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorTest {
    pub test_title: String,
    pub endpoint_title: String,
    pub path: String,
    pub url: String,
    pub viewport: Viewport,
    pub capture: CaptureMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blackout: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_to_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_visit: Option<String>,
}

/// The JSON document behind `VIZREG_RUN_CONFIG`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub suite: String,
    pub test_type: vizreg_common::TestType,
    pub base_url: String,
    pub snapshots_dir: PathBuf,
    pub snap: bool,
    pub gui: bool,
    pub diff_list: Vec<String>,
    pub target_endpoints: Vec<String>,
    pub target_viewports: Vec<String>,
    pub tests: Vec<DescriptorTest>,
}

impl RunDescriptor {
    pub fn new(invocation: &EngineInvocation) -> Self {
        let suite = &invocation.suite;
        let plan = &invocation.plan;

        let tests = plan
            .agenda
            .iter()
            .filter_map(|identity| {
                let endpoint = suite.endpoint(&identity.endpoint_title)?;
                Some(DescriptorTest {
                    test_title: identity.canonical(),
                    endpoint_title: endpoint.title.clone(),
                    path: endpoint.path.clone(),
                    url: join_url(&suite.base_url, &endpoint.path),
                    viewport: identity.viewport.clone(),
                    capture: suite.effective_capture(endpoint),
                    padding: suite.effective_padding(endpoint),
                    blackout: suite.effective_blackout(endpoint),
                    element_to_match: endpoint.element_to_match.clone(),
                    on_visit: endpoint.on_visit.clone(),
                })
            })
            .collect();

        Self {
            suite: suite.name.clone(),
            test_type: plan.test_type,
            base_url: suite.base_url.clone(),
            snapshots_dir: invocation.snapshots_dir.clone(),
            snap: plan.test_type.is_snapshot(),
            gui: invocation.gui,
            diff_list: plan.diff_allowlist.iter().map(|i| i.canonical()).collect(),
            target_endpoints: plan.filters.endpoint_titles.clone(),
            target_viewports: plan.filters.viewports.clone(),
            tests,
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Something that can capture and compare an agenda
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Run the agenda, reporting events through `recorder` as they arrive.
    ///
    /// Spawn failures are returned as [`EngineExit::SpawnError`] rather than
    /// as an error, so the caller can still restore artifacts.
    async fn run(
        &self,
        invocation: &EngineInvocation,
        cancel: CancellationToken,
        recorder: &mut EngineRecorder,
    ) -> RunResult<EngineExit>;
}

/// Run `engine` and gather the result, partial or not
pub async fn execute(
    engine: &dyn CaptureEngine,
    invocation: &EngineInvocation,
    cancel: CancellationToken,
    sink: Option<UnboundedSender<SessionEvent>>,
) -> RunResult<EngineRun> {
    let started = Instant::now();
    let mut recorder = EngineRecorder::new(sink);
    let exit = engine.run(invocation, cancel.clone(), &mut recorder).await?;
    let duration = started.elapsed();

    match &exit {
        EngineExit::Success => info!("Capture engine finished in {:?}", duration),
        EngineExit::Failure(code) => warn!("Capture engine exited with status {:?}", code),
        EngineExit::SpawnError(e) => error!("Capture engine could not be started: {}", e),
    }

    Ok(recorder.finish(exit, cancel.is_cancelled(), duration))
}

/// Spawns the configured engine program
pub struct ProcessEngine {
    working_dir: PathBuf,
}

impl ProcessEngine {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl CaptureEngine for ProcessEngine {
    async fn run(
        &self,
        invocation: &EngineInvocation,
        cancel: CancellationToken,
        recorder: &mut EngineRecorder,
    ) -> RunResult<EngineExit> {
        let settings = &invocation.suite.engine;
        let descriptor = RunDescriptor::new(invocation);

        let temp_dir = tempfile::tempdir()?;
        let descriptor_path = temp_dir.path().join("run.json");
        std::fs::write(&descriptor_path, serde_json::to_vec_pretty(&descriptor)?)?;

        let args = match (&settings.gui_args, invocation.gui) {
            (Some(gui_args), true) => gui_args.clone(),
            (None, true) => {
                warn!("GUI mode requested but no gui_args configured; running headless");
                settings.args.clone()
            }
            _ => settings.args.clone(),
        };

        debug!(
            "Spawning {} {:?} (descriptor {})",
            settings.program,
            args,
            descriptor_path.display()
        );

        let mut command = Command::new(&settings.program);
        command
            .args(&args)
            .current_dir(&self.working_dir)
            .envs(&settings.env)
            .env("VIZREG_RUN_CONFIG", &descriptor_path)
            .env("VIZREG_SUITE", &descriptor.suite)
            .env("VIZREG_TEST_TYPE", descriptor.test_type.as_str())
            .env("VIZREG_SNAPSHOTS_DIR", &descriptor.snapshots_dir)
            .env("VIZREG_DIFF_LIST", serde_json::to_string(&descriptor.diff_list)?)
            .env(
                "VIZREG_TARGET_ENDPOINTS",
                serde_json::to_string(&descriptor.target_endpoints)?,
            )
            .env(
                "VIZREG_TARGET_VIEWPORTS",
                serde_json::to_string(&descriptor.target_viewports)?,
            )
            .env("VIZREG_SNAP", if descriptor.snap { "1" } else { "0" })
            .env("VIZREG_GUI", if invocation.gui { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(EngineExit::SpawnError(format!("{}: {}", settings.program, e))),
        };
        info!(
            "Started capture engine (pid {:?}) for {} test(s)",
            child.id(),
            descriptor.tests.len()
        );

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Ok(EngineExit::SpawnError("engine output pipes unavailable".into()));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let mut parser = OutputParser::new(settings.suite_slug.clone());

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Run cancelled; stopping capture engine");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill capture engine: {}", e);
                    }
                    break child.wait().await?;
                }
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(text)) => recorder.line(&mut parser, text),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("Error reading engine stdout: {}", e);
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(text)) => recorder.line(&mut parser, text),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!("Error reading engine stderr: {}", e);
                        stderr_open = false;
                    }
                },
                status = child.wait(), if !stdout_open && !stderr_open => break status?,
            }
        };

        recorder.set_tally(parser.tally());

        Ok(if status.success() {
            EngineExit::Success
        } else {
            EngineExit::Failure(status.code())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizreg_common::config::{ProjectFile, SuiteFile};
    use vizreg_common::{Endpoint, TestType};

    use crate::planner::{plan, TargetFilters};
    use crate::store::ArtifactStore;

    fn invocation(dir: &std::path::Path) -> EngineInvocation {
        let mut blog = Endpoint::new("Blog", "blog");
        blog.capture = Some(CaptureMode::Viewport);
        let suite = SuiteConfig::resolve(
            "site",
            &ProjectFile::default(),
            SuiteFile {
                base_url: Some("http://localhost:8080/".into()),
                viewports: Some(vec![Viewport::preset("iphone-6")]),
                endpoints: vec![Endpoint::new("Start", "/"), blog],
                ..Default::default()
            },
        )
        .unwrap();
        let store = ArtifactStore::for_suite(dir);
        let plan = plan(
            TestType::Targeted,
            &suite,
            &store,
            &TargetFilters::new(vec!["Blog".into()], vec![]),
        )
        .unwrap();
        EngineInvocation {
            suite,
            plan,
            snapshots_dir: store.snaps_dir().to_path_buf(),
            gui: false,
        }
    }

    #[test]
    fn test_descriptor_carries_agenda() {
        let tmp = tempfile::TempDir::new().unwrap();
        let descriptor = RunDescriptor::new(&invocation(tmp.path()));

        assert_eq!(descriptor.tests.len(), 1);
        let test = &descriptor.tests[0];
        assert_eq!(test.test_title, "Blog @ iphone-6");
        assert_eq!(test.url, "http://localhost:8080/blog");
        assert_eq!(test.capture, CaptureMode::Viewport);
        assert!(descriptor.snap);
        assert_eq!(descriptor.target_endpoints, vec!["Blog"]);
        assert!(descriptor.diff_list.is_empty());
    }

    #[test]
    fn test_executor_summary_prefers_engine_tally() {
        let run = EngineRun {
            exit: EngineExit::Failure(Some(1)),
            passing: vec!["A @ x".into(), "A @ x".into()],
            failing: vec![],
            user_terminated: false,
            cancelled: false,
            tally: EngineTally {
                passing: None,
                failing: Some(2),
                pending: Some(1),
            },
            duration: Duration::from_millis(1500),
        };
        let summary = run.executor_summary();
        assert_eq!(summary.passing, 1);
        assert_eq!(summary.failing, 2);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.tests, 4);
        assert_eq!(summary.duration_ms, 1500);
    }

    #[test]
    fn test_recorder_forwards_to_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut recorder = EngineRecorder::new(Some(tx));
        let mut parser = OutputParser::new("site");
        recorder.line(&mut parser, "  ✓ Start @ iphone-6 (12ms)".into());

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Raw { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Passing {
                test_title: "Start @ iphone-6".into()
            }
        );
        let run = recorder.finish(EngineExit::Success, false, Duration::ZERO);
        assert_eq!(run.passing, vec!["Start @ iphone-6"]);
    }
}
