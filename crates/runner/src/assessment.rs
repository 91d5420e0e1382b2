//! Human review of diff artifacts, one at a time.
//!
//! Run state: `Idle -> Assessing -> Summarized`. Each item starts `Pending`
//! and ends `Approved`, `Rejected` or `Failed`. Only the current item can be
//! decided, so a stale caller (a second browser tab, a repeated keypress)
//! gets an error instead of touching another artifact.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tracing::{debug, error, info, warn};
use vizreg_common::{ArtifactRole, AssessmentSummary, TestIdentity};

use crate::error::{RunError, RunResult};
use crate::store::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentState {
    Idle,
    Assessing,
    Summarized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Approved,
    Rejected,
    /// The filesystem operation behind an approval failed
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentItem {
    pub index: usize,
    pub test_title: String,
    pub identity: TestIdentity,
    pub diff_file: String,
    pub received_file: String,
    pub baseline_file: String,
    /// False for a first capture with no approved baseline yet
    pub has_baseline: bool,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Assessment {
    store: ArtifactStore,
    items: Vec<AssessmentItem>,
    current: Option<usize>,
    state: AssessmentState,
}

impl Assessment {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            items: Vec::new(),
            current: None,
            state: AssessmentState::Idle,
        }
    }

    pub fn state(&self) -> AssessmentState {
        self.state
    }

    pub fn items(&self) -> &[AssessmentItem] {
        &self.items
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&AssessmentItem> {
        self.current.and_then(|i| self.items.get(i))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Enumerate current diffs, optionally limited to `only`, and load the first.
    ///
    /// Starting over discards decisions of a previous pass; their filesystem
    /// effects stay.
    pub fn begin(&mut self, only: Option<&[TestIdentity]>) -> RunResult<Option<&AssessmentItem>> {
        let diffs = self.store.list_diffs()?;
        self.items = diffs
            .into_iter()
            .filter(|identity| only.map_or(true, |wanted| wanted.contains(identity)))
            .enumerate()
            .map(|(index, identity)| AssessmentItem {
                index,
                test_title: identity.canonical(),
                diff_file: identity.file_name(ArtifactRole::Diff),
                received_file: identity.file_name(ArtifactRole::Received),
                baseline_file: identity.file_name(ArtifactRole::Baseline),
                has_baseline: self.store.path(&identity, ArtifactRole::Baseline).is_file(),
                identity,
                decision: Decision::Pending,
                error: None,
            })
            .collect();

        if self.items.is_empty() {
            info!("No diffs to assess in {}", self.store.snaps_dir().display());
            self.current = None;
            self.state = AssessmentState::Summarized;
        } else {
            info!("Assessing {} diff(s)", self.items.len());
            self.current = Some(0);
            self.state = AssessmentState::Assessing;
        }

        Ok(self.current())
    }

    fn check_decidable(&self, index: usize) -> RunResult<()> {
        if self.state != AssessmentState::Assessing {
            return Err(RunError::NotAssessing);
        }
        let item = self.items.get(index).ok_or(RunError::IndexOutOfRange {
            index,
            len: self.items.len(),
        })?;
        if item.decision != Decision::Pending {
            return Err(RunError::AlreadyDecided(index));
        }
        if self.current != Some(index) {
            return Err(RunError::NotCurrent {
                index,
                current: self.current,
            });
        }
        Ok(())
    }

    /// Promote the received image to baseline and drop the diff.
    ///
    /// A filesystem failure marks the item `Failed`, still advances the
    /// queue and is returned to the caller.
    pub fn approve(&mut self, index: usize) -> RunResult<Option<&AssessmentItem>> {
        self.check_decidable(index)?;

        let identity = self.items[index].identity.clone();
        match approve_artifact(&self.store, &identity) {
            Ok(()) => {
                info!("Approved {}", identity);
                self.items[index].decision = Decision::Approved;
                self.advance();
                Ok(self.current())
            }
            Err(e) => {
                error!("Failed to approve {}: {}", identity, e);
                self.items[index].decision = Decision::Failed;
                self.items[index].error = Some(e.to_string());
                self.advance();
                Err(e)
            }
        }
    }

    /// Record a rejection; every artifact stays where it is
    pub fn reject(&mut self, index: usize) -> RunResult<Option<&AssessmentItem>> {
        self.check_decidable(index)?;

        info!("Rejected {}", self.items[index].identity);
        self.items[index].decision = Decision::Rejected;
        self.advance();
        Ok(self.current())
    }

    /// Approve every remaining pending item in order; returns how many succeeded
    pub fn approve_all(&mut self) -> RunResult<usize> {
        if self.state != AssessmentState::Assessing {
            return Err(RunError::NotAssessing);
        }

        let mut approved = 0;
        while let Some(index) = self.current {
            match self.approve(index) {
                Ok(_) => approved += 1,
                Err(e) => warn!("Continuing after failed approval: {}", e),
            }
        }
        Ok(approved)
    }

    /// Abandon the pass; unvisited diffs are left alone
    pub fn cancel(&mut self) {
        if self.state == AssessmentState::Assessing {
            info!(
                "Assessment cancelled with {} diff(s) undecided",
                self.items
                    .iter()
                    .filter(|i| i.decision == Decision::Pending)
                    .count()
            );
        }
        self.current = None;
        self.state = AssessmentState::Idle;
    }

    pub fn summary(&self) -> AssessmentSummary {
        let names = |decision: Decision| -> Vec<String> {
            self.items
                .iter()
                .filter(|i| i.decision == decision)
                .map(|i| i.test_title.clone())
                .collect()
        };

        AssessmentSummary {
            approved_files: names(Decision::Approved),
            rejected_files: names(Decision::Rejected),
            failed: self.items.iter().any(|i| i.decision == Decision::Failed),
        }
    }

    fn advance(&mut self) {
        self.current = self
            .items
            .iter()
            .position(|i| i.decision == Decision::Pending);

        if self.current.is_none() {
            let summary = self.summary();
            info!(
                "Assessment complete: {} approved, {} rejected{}",
                summary.approved_files.len(),
                summary.rejected_files.len(),
                if summary.failed { ", with failures" } else { "" }
            );
            self.state = AssessmentState::Summarized;
        }
    }
}

/// Make the received image the new baseline and remove the diff.
///
/// Checks for the received file before touching anything, so approving an
/// identity twice fails with [`RunError::ArtifactMissing`] and leaves every
/// file as it was. The promotion is a single rename over the baseline.
pub fn approve_artifact(store: &ArtifactStore, identity: &TestIdentity) -> RunResult<()> {
    let received = store.path(identity, ArtifactRole::Received);
    let baseline = store.path(identity, ArtifactRole::Baseline);
    let diff = store.path(identity, ArtifactRole::Diff);

    if !received.is_file() {
        return Err(RunError::ArtifactMissing(received));
    }

    std::fs::rename(&received, &baseline)?;
    debug!("{} -> {}", received.display(), baseline.display());

    match std::fs::remove_file(&diff) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Diff for {} was already gone", identity);
            Ok(())
        }
        Err(source) => Err(RunError::Inconsistent {
            identity: identity.canonical(),
            step: "remove the diff image",
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(store: &ArtifactStore, name: &str, baseline: bool) {
        let id = TestIdentity::parse(name).unwrap();
        store.ensure_dirs().unwrap();
        std::fs::write(store.path(&id, ArtifactRole::Diff), b"diff").unwrap();
        std::fs::write(store.path(&id, ArtifactRole::Received), format!("new {}", name)).unwrap();
        if baseline {
            std::fs::write(store.path(&id, ArtifactRole::Baseline), b"old").unwrap();
        }
    }

    fn setup() -> (TempDir, ArtifactStore) {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::for_suite(tmp.path());
        seed(&store, "Blog @ iphone-6", true);
        seed(&store, "Start @ 1920,1080", true);
        (tmp, store)
    }

    #[test]
    fn test_approve_promotes_received() {
        let (_tmp, store) = setup();
        let mut assessment = Assessment::new(store.clone());
        let first = assessment.begin(None).unwrap().unwrap().clone();
        assert_eq!(first.test_title, "Blog @ iphone-6");
        assert!(first.has_baseline);

        let next = assessment.approve(0).unwrap().unwrap();
        assert_eq!(next.index, 1);

        let id = TestIdentity::parse("Blog @ iphone-6").unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path(&id, ArtifactRole::Baseline)).unwrap(),
            "new Blog @ iphone-6"
        );
        assert!(!store.path(&id, ArtifactRole::Diff).exists());
        assert!(!store.path(&id, ArtifactRole::Received).exists());
    }

    #[test]
    fn test_reject_leaves_files_and_summarizes() {
        let (_tmp, store) = setup();
        let mut assessment = Assessment::new(store.clone());
        assessment.begin(None).unwrap();

        assessment.reject(0).unwrap();
        assert!(assessment.approve(1).unwrap().is_none());
        assert_eq!(assessment.state(), AssessmentState::Summarized);

        let summary = assessment.summary();
        assert_eq!(summary.rejected_files, vec!["Blog @ iphone-6"]);
        assert_eq!(summary.approved_files, vec!["Start @ 1920,1080"]);
        assert!(!summary.failed);

        let id = TestIdentity::parse("Blog @ iphone-6").unwrap();
        assert!(store.path(&id, ArtifactRole::Diff).exists());
        assert!(store.path(&id, ArtifactRole::Received).exists());
        assert_eq!(std::fs::read(store.path(&id, ArtifactRole::Baseline)).unwrap(), b"old");
    }

    #[test]
    fn test_stale_decisions_are_refused() {
        let (_tmp, store) = setup();
        let mut assessment = Assessment::new(store);
        assert!(matches!(assessment.approve(0), Err(RunError::NotAssessing)));

        assessment.begin(None).unwrap();
        assert!(matches!(
            assessment.approve(1),
            Err(RunError::NotCurrent { index: 1, current: Some(0) })
        ));
        assessment.approve(0).unwrap();
        assert!(matches!(assessment.approve(0), Err(RunError::AlreadyDecided(0))));
        assert!(matches!(
            assessment.reject(7),
            Err(RunError::IndexOutOfRange { index: 7, len: 2 })
        ));
    }

    #[test]
    fn test_second_approval_of_same_artifact_fails_cleanly() {
        let (_tmp, store) = setup();
        let mut first = Assessment::new(store.clone());
        let mut second = Assessment::new(store.clone());
        first.begin(None).unwrap();
        second.begin(None).unwrap();

        first.approve(0).unwrap();
        let err = second.approve(0).unwrap_err();
        assert!(matches!(err, RunError::ArtifactMissing(_)));
        assert_eq!(second.items()[0].decision, Decision::Failed);
        assert!(second.summary().failed);
        // The queue moved on and the other artifact is untouched
        assert_eq!(second.current_index(), Some(1));
        let other = TestIdentity::parse("Start @ 1920,1080").unwrap();
        assert_eq!(std::fs::read(store.path(&other, ArtifactRole::Baseline)).unwrap(), b"old");

        let id = TestIdentity::parse("Blog @ iphone-6").unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path(&id, ArtifactRole::Baseline)).unwrap(),
            "new Blog @ iphone-6"
        );
    }

    #[test]
    fn test_diff_that_cannot_be_removed_leaves_item_failed() {
        let (_tmp, store) = setup();
        let mut assessment = Assessment::new(store.clone());
        assessment.begin(None).unwrap();

        // Replace the diff with a non-empty directory of the same name
        let id = TestIdentity::parse("Blog @ iphone-6").unwrap();
        let diff = store.path(&id, ArtifactRole::Diff);
        std::fs::remove_file(&diff).unwrap();
        std::fs::create_dir_all(&diff).unwrap();
        std::fs::write(diff.join("stray.png"), b"x").unwrap();

        let err = assessment.approve(0).unwrap_err();
        assert!(matches!(
            err,
            RunError::Inconsistent { ref identity, .. } if identity == "Blog @ iphone-6"
        ));
        assert_eq!(assessment.items()[0].decision, Decision::Failed);
        assert!(assessment.items()[0].error.is_some());
        assert_eq!(assessment.current_index(), Some(1));
        assert!(assessment.summary().failed);

        // The promotion before the failed step stands
        assert_eq!(
            std::fs::read_to_string(store.path(&id, ArtifactRole::Baseline)).unwrap(),
            "new Blog @ iphone-6"
        );
        assert!(!store.path(&id, ArtifactRole::Received).exists());
    }

    #[test]
    fn test_cancel_leaves_unvisited_diffs() {
        let (_tmp, store) = setup();
        let mut assessment = Assessment::new(store.clone());
        assessment.begin(None).unwrap();
        assessment.approve(0).unwrap();
        assessment.cancel();

        assert_eq!(assessment.state(), AssessmentState::Idle);
        assert!(assessment.current().is_none());
        assert!(matches!(assessment.reject(1), Err(RunError::NotAssessing)));
        assert_eq!(assessment.summary().approved_files, vec!["Blog @ iphone-6"]);
        assert_eq!(store.list_diffs().unwrap().len(), 1);
    }

    #[test]
    fn test_begin_with_filter_and_approve_all() {
        let (_tmp, store) = setup();
        seed(&store, "Pricing @ iphone-6", false);
        let only = vec![
            TestIdentity::parse("Pricing @ iphone-6").unwrap(),
            TestIdentity::parse("Start @ 1920,1080").unwrap(),
        ];

        let mut assessment = Assessment::new(store.clone());
        let first = assessment.begin(Some(&only)).unwrap().unwrap();
        assert!(!first.has_baseline);
        assert_eq!(assessment.items().len(), 2);

        assert_eq!(assessment.approve_all().unwrap(), 2);
        assert_eq!(assessment.state(), AssessmentState::Summarized);
        assert_eq!(
            store
                .list_diffs()
                .unwrap()
                .iter()
                .map(|i| i.canonical())
                .collect::<Vec<_>>(),
            vec!["Blog @ iphone-6"]
        );
    }

    #[test]
    fn test_begin_without_diffs_is_summarized() {
        let tmp = TempDir::new().unwrap();
        let mut assessment = Assessment::new(ArtifactStore::for_suite(tmp.path()));
        assert!(assessment.begin(None).unwrap().is_none());
        assert_eq!(assessment.state(), AssessmentState::Summarized);
        assert_eq!(assessment.summary(), AssessmentSummary::default());
    }
}
