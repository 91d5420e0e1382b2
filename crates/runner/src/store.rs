//! Per-suite artifact layout on disk
//!
//! ```text
//! suites/<suite>/snapshots/snaps/
//!   <name>.base.png            baselines
//!   __diff_output__/           <name>.diff.png
//!   __received_output__/       <name>-received.png
//!   backup-diffs/              scoped-run backups of __diff_output__
//!   backup-received/           scoped-run backups of __received_output__
//!   lab/                       same layout, never authoritative
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vizreg_common::{ArtifactRole, TestIdentity};

use crate::error::RunResult;

pub const SNAPS_SUBDIR: &str = "snapshots/snaps";
pub const DIFF_DIR: &str = "__diff_output__";
pub const RECEIVED_DIR: &str = "__received_output__";
pub const BACKUP_DIFFS_DIR: &str = "backup-diffs";
pub const BACKUP_RECEIVED_DIR: &str = "backup-received";
pub const LAB_DIR: &str = "lab";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    snaps_dir: PathBuf,
}

impl ArtifactStore {
    pub fn for_suite(suite_dir: &Path) -> Self {
        Self {
            snaps_dir: suite_dir.join(SNAPS_SUBDIR),
        }
    }

    /// The lab namespace nested under this store
    pub fn lab(&self) -> Self {
        Self {
            snaps_dir: self.snaps_dir.join(LAB_DIR),
        }
    }

    pub fn snaps_dir(&self) -> &Path {
        &self.snaps_dir
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.snaps_dir.join(DIFF_DIR)
    }

    pub fn received_dir(&self) -> PathBuf {
        self.snaps_dir.join(RECEIVED_DIR)
    }

    pub fn backup_diff_dir(&self) -> PathBuf {
        self.snaps_dir.join(BACKUP_DIFFS_DIR)
    }

    pub fn backup_received_dir(&self) -> PathBuf {
        self.snaps_dir.join(BACKUP_RECEIVED_DIR)
    }

    pub fn dir_for(&self, role: ArtifactRole) -> PathBuf {
        match role {
            ArtifactRole::Baseline => self.snaps_dir.clone(),
            ArtifactRole::Received => self.received_dir(),
            ArtifactRole::Diff => self.diff_dir(),
        }
    }

    pub fn path(&self, identity: &TestIdentity, role: ArtifactRole) -> PathBuf {
        self.dir_for(role).join(identity.file_name(role))
    }

    pub fn ensure_dirs(&self) -> RunResult<()> {
        std::fs::create_dir_all(self.diff_dir())?;
        std::fs::create_dir_all(self.received_dir())?;
        Ok(())
    }

    /// Identities with a diff artifact, ordered by file name
    pub fn list_diffs(&self) -> RunResult<Vec<TestIdentity>> {
        let mut identities = Vec::new();
        for name in list_files(&self.diff_dir())? {
            match ArtifactRole::Diff.parse_file_name(&name) {
                Some(identity) => identities.push(identity),
                None => warn!("Ignoring unrecognised file in diff directory: {}", name),
            }
        }
        Ok(identities)
    }

    /// Delete every diff and received artifact
    pub fn purge_diffs_and_received(&self) -> RunResult<usize> {
        let mut removed = 0;
        for dir in [self.diff_dir(), self.received_dir()] {
            for name in list_files(&dir)? {
                std::fs::remove_file(dir.join(&name))?;
                removed += 1;
            }
        }
        debug!("Purged {} diff/received artifacts in {}", removed, self.snaps_dir.display());
        Ok(removed)
    }
}

/// Plain file names directly inside `dir`, sorted; a missing directory is empty
pub fn list_files(dir: &Path) -> RunResult<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vizreg_common::Viewport;

    #[test]
    fn test_layout() {
        let store = ArtifactStore::for_suite(Path::new("/p/suites/site"));
        let id = TestIdentity::new("Start", Viewport::size(1920, 1080));
        assert_eq!(
            store.path(&id, ArtifactRole::Diff),
            PathBuf::from("/p/suites/site/snapshots/snaps/__diff_output__/Start @ 1920,1080.diff.png")
        );
        assert_eq!(
            store.path(&id, ArtifactRole::Baseline),
            PathBuf::from("/p/suites/site/snapshots/snaps/Start @ 1920,1080.base.png")
        );
        assert_eq!(
            store.lab().received_dir(),
            PathBuf::from("/p/suites/site/snapshots/snaps/lab/__received_output__")
        );
    }

    #[test]
    fn test_list_diffs_skips_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::for_suite(tmp.path());
        store.ensure_dirs().unwrap();
        std::fs::write(store.diff_dir().join("Blog @ iphone-6.diff.png"), b"b").unwrap();
        std::fs::write(store.diff_dir().join("Start @ iphone-6.diff.png"), b"a").unwrap();
        std::fs::write(store.diff_dir().join("notes.txt"), b"x").unwrap();

        let diffs = store.list_diffs().unwrap();
        assert_eq!(
            diffs.iter().map(|d| d.canonical()).collect::<Vec<_>>(),
            vec!["Blog @ iphone-6", "Start @ iphone-6"]
        );
    }

    #[test]
    fn test_missing_dirs_list_empty() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::for_suite(tmp.path());
        assert!(store.list_diffs().unwrap().is_empty());
        assert_eq!(store.purge_diffs_and_received().unwrap(), 0);
    }
}
