//! vizreg run orchestration
//!
//! This crate owns the part of visual regression testing that moves files
//! around and keeps score:
//! - Plans which endpoint × viewport pairs a run covers
//! - Backs up and restores diff/received artifacts around scoped runs
//! - Drives the external capture engine and classifies its output
//! - Reconciles the agenda with the engine's reports
//! - Walks a human through approving or rejecting each diff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RunSession                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  prepare(project, request)                                  │
//! │    └── planner::plan() -> RunPlan                           │
//! │  execute(engine, cancel, sink)                              │
//! │    ├── BackupManager::recover_stale / backup                │
//! │    ├── CaptureEngine::run -> EngineRun                      │
//! │    │     └── OutputParser: passing / failing / raw          │
//! │    ├── aggregate() -> passing/failing/skipped/unchanged     │
//! │    └── BackupManager::restore / rollback                    │
//! │  begin_assessment() -> Assessment                           │
//! │    └── approve / reject / approve_all / cancel              │
//! │  summarize() -> RunSummary -> RunHistory                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod assessment;
pub mod backup;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod parser;
pub mod planner;
pub mod session;
pub mod store;

pub use assessment::{Assessment, AssessmentItem, AssessmentState, Decision};
pub use error::{RunError, RunResult};
pub use events::{ExecutorEvent, SessionEvent};
pub use executor::{CaptureEngine, EngineExit, EngineRecorder, EngineRun, ProcessEngine};
pub use history::RunHistory;
pub use planner::{RunPlan, TargetFilters};
pub use session::{RunOutcome, RunRequest, RunSession};
pub use store::ArtifactStore;
