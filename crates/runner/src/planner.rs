//! Run planning: which endpoint × viewport pairs a run executes and what
//! happens to existing artifacts around it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use vizreg_common::{ArtifactRole, SuiteConfig, TestIdentity, TestType, Viewport};

use crate::error::{RunError, RunResult};
use crate::store::ArtifactStore;

/// Caller-selected endpoints and viewports for targeted and lab runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetFilters {
    #[serde(default)]
    pub endpoint_titles: Vec<String>,
    #[serde(default)]
    pub viewports: Vec<String>,
}

impl TargetFilters {
    pub fn new(endpoint_titles: Vec<String>, viewports: Vec<String>) -> Self {
        Self {
            endpoint_titles,
            viewports,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint_titles.is_empty() && self.viewports.is_empty()
    }
}

/// What the session does with existing diff/received artifacts before the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPolicy {
    /// Delete them all; the run is a clean-slate comparison
    Purge,
    /// Move them to the backup area and restore what falls outside the scope
    Backup,
    /// Work only in the lab namespace, which is purged
    LabNamespace,
}

/// The concrete agenda of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub suite: String,
    pub test_type: TestType,
    pub agenda: Vec<TestIdentity>,
    pub filters: TargetFilters,
    /// Identities whose diffs a diffs-only run re-tests
    pub diff_allowlist: Vec<TestIdentity>,
    pub policy: ArtifactPolicy,
    /// Filter values that matched nothing in the suite
    pub unmatched: TargetFilters,
}

impl RunPlan {
    pub fn in_scope(&self, identity: &TestIdentity) -> bool {
        self.agenda.contains(identity)
    }

    /// Whether an artifact file belongs to this run's scope.
    ///
    /// Names that parse as diff or received artifacts are matched exactly;
    /// anything else falls back to a case-insensitive substring match on the
    /// canonical names in the agenda.
    pub fn scope_contains_file(&self, file_name: &str) -> bool {
        match artifact_identity(file_name) {
            Some(identity) => self.in_scope(&identity),
            None => {
                let lowered = file_name.to_lowercase();
                self.agenda
                    .iter()
                    .any(|id| lowered.contains(&id.canonical().to_lowercase()))
            }
        }
    }

    /// Diffs-only runs require full success or full rollback
    pub fn rolls_back_on_failure(&self) -> bool {
        self.test_type == TestType::DiffsOnly
    }
}

/// Identity of a diff or received artifact file name
pub fn artifact_identity(file_name: &str) -> Option<TestIdentity> {
    ArtifactRole::Diff
        .parse_file_name(file_name)
        .or_else(|| ArtifactRole::Received.parse_file_name(file_name))
}

/// Full cross product of endpoints × viewports, endpoint-major
pub fn full_agenda(suite: &SuiteConfig) -> Vec<TestIdentity> {
    suite
        .endpoints
        .iter()
        .flat_map(|endpoint| {
            suite
                .viewports
                .iter()
                .map(move |viewport| endpoint.identity(viewport))
        })
        .collect()
}

/// Compute the agenda for a run. Performs no filesystem mutation.
pub fn plan(
    test_type: TestType,
    suite: &SuiteConfig,
    store: &ArtifactStore,
    filters: &TargetFilters,
) -> RunResult<RunPlan> {
    let mut plan = RunPlan {
        suite: suite.name.clone(),
        test_type,
        agenda: Vec::new(),
        filters: filters.clone(),
        diff_allowlist: Vec::new(),
        policy: ArtifactPolicy::Backup,
        unmatched: TargetFilters::default(),
    };

    match test_type {
        TestType::FullTest => {
            plan.agenda = full_agenda(suite);
            plan.policy = ArtifactPolicy::Purge;
        }
        TestType::DiffsOnly => {
            let diffs = store.list_diffs()?;
            if diffs.is_empty() {
                return Err(RunError::NoDiffs(suite.name.clone()));
            }

            let wanted: HashSet<&TestIdentity> = diffs.iter().collect();
            plan.agenda = full_agenda(suite)
                .into_iter()
                .filter(|id| wanted.contains(id))
                .collect();

            for stale in diffs.iter().filter(|d| !plan.agenda.contains(d)) {
                warn!(
                    "Diff '{}' has no matching endpoint/viewport in suite '{}'; it will be kept as is",
                    stale, suite.name
                );
            }
            if plan.agenda.is_empty() {
                return Err(RunError::NoDiffs(suite.name.clone()));
            }
            plan.diff_allowlist = plan.agenda.clone();
        }
        TestType::Targeted | TestType::Lab => {
            if filters.is_empty() {
                return Err(RunError::NoTargetFilters);
            }
            let (agenda, unmatched) = filter_agenda(suite, filters);
            if !unmatched.is_empty() {
                warn!(
                    "Filters matched nothing in suite '{}': endpoints {:?}, viewports {:?}",
                    suite.name, unmatched.endpoint_titles, unmatched.viewports
                );
            }
            if agenda.is_empty() {
                return Err(RunError::NoMatchingTargets {
                    endpoints: filters.endpoint_titles.clone(),
                    viewports: filters.viewports.clone(),
                });
            }
            plan.agenda = agenda;
            plan.unmatched = unmatched;
            if test_type == TestType::Lab {
                plan.policy = ArtifactPolicy::LabNamespace;
            }
        }
    }

    info!(
        "Planned {} run for suite '{}': {} test(s)",
        test_type,
        suite.name,
        plan.agenda.len()
    );
    for identity in &plan.agenda {
        debug!("  agenda: {}", identity);
    }

    Ok(plan)
}

fn filter_agenda(suite: &SuiteConfig, filters: &TargetFilters) -> (Vec<TestIdentity>, TargetFilters) {
    let wanted_viewports: Vec<Viewport> = filters
        .viewports
        .iter()
        .map(|v| Viewport::parse(v))
        .collect();

    let unmatched = TargetFilters {
        endpoint_titles: filters
            .endpoint_titles
            .iter()
            .filter(|t| suite.endpoint(t).is_none())
            .cloned()
            .collect(),
        viewports: filters
            .viewports
            .iter()
            .zip(&wanted_viewports)
            .filter(|(_, v)| !suite.has_viewport(v))
            .map(|(raw, _)| raw.clone())
            .collect(),
    };

    let agenda = full_agenda(suite)
        .into_iter()
        .filter(|id| {
            filters.endpoint_titles.is_empty()
                || filters.endpoint_titles.iter().any(|t| *t == id.endpoint_title)
        })
        .filter(|id| wanted_viewports.is_empty() || wanted_viewports.contains(&id.viewport))
        .collect();

    (agenda, unmatched)
}
