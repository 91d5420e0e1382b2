//! Backup and restore of diff/received artifacts around scoped runs.
//!
//! Every move is a rename, so a file is never present in both the live and
//! the backup directory at once. Backup directories are empty outside the
//! window between [`BackupManager::backup`] and [`BackupManager::cleanup`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::RunResult;
use crate::store::{list_files, ArtifactStore};

/// File names moved into the backup area by one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSet {
    pub diffs: Vec<String>,
    pub received: Vec<String>,
}

impl BackupSet {
    pub fn len(&self) -> usize {
        self.diffs.len() + self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BackupManager {
    store: ArtifactStore,
}

impl BackupManager {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// (live, backup) directory pairs
    fn pairs(&self) -> [(PathBuf, PathBuf); 2] {
        [
            (self.store.diff_dir(), self.store.backup_diff_dir()),
            (self.store.received_dir(), self.store.backup_received_dir()),
        ]
    }

    pub fn has_backup(&self) -> RunResult<bool> {
        for (_, backup) in self.pairs() {
            if !list_files(&backup)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Put back files left in the backup area by a run that never reached cleanup
    pub fn recover_stale(&self) -> RunResult<Vec<String>> {
        if !self.has_backup()? {
            return Ok(Vec::new());
        }

        warn!(
            "Found leftover backups in {}; a previous run was interrupted. Restoring them.",
            self.store.snaps_dir().display()
        );
        let restored = self.restore(|_| true)?;
        self.cleanup()?;
        Ok(restored)
    }

    /// Move every diff and received file into the backup area
    pub fn backup(&self) -> RunResult<BackupSet> {
        self.recover_stale()?;

        let mut set = BackupSet::default();
        for (i, (live, backup)) in self.pairs().into_iter().enumerate() {
            std::fs::create_dir_all(&backup)?;
            for name in list_files(&live)? {
                std::fs::rename(live.join(&name), backup.join(&name))?;
                debug!("Backed up {}", name);
                if i == 0 {
                    set.diffs.push(name);
                } else {
                    set.received.push(name);
                }
            }
        }

        info!("Backed up {} artifact(s) before scoped run", set.len());
        Ok(set)
    }

    /// Move backed-up files matching `predicate` back into the live directories
    pub fn restore<F>(&self, predicate: F) -> RunResult<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let mut moves = Vec::new();
        for (live, backup) in self.pairs() {
            let names = list_files(&backup)?;
            if names.is_empty() {
                continue;
            }
            std::fs::create_dir_all(&live)?;
            for name in names.into_iter().filter(|name| predicate(name)) {
                let target = live.join(&name);
                // A blocked target must fail the restore before anything has moved
                if target.is_dir() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("cannot restore {}: {} is a directory", name, target.display()),
                    )
                    .into());
                }
                moves.push((backup.join(&name), target, name));
            }
        }

        let mut restored = Vec::new();
        for (from, target, name) in moves {
            if target.exists() {
                warn!("Restoring {} over a file produced by this run", name);
            }
            std::fs::rename(from, target)?;
            debug!("Restored {}", name);
            restored.push(name);
        }

        if !restored.is_empty() {
            info!("Restored {} artifact(s) from backup", restored.len());
        }
        Ok(restored)
    }

    /// Return the live directories to exactly their pre-backup contents
    pub fn rollback(&self) -> RunResult<Vec<String>> {
        let mut discarded = 0;
        for (live, _) in self.pairs() {
            discarded += clear_dir(&live)?;
        }
        if discarded > 0 {
            info!("Discarded {} artifact(s) produced by the rolled-back run", discarded);
        }

        let restored = self.restore(|_| true)?;
        self.cleanup()?;
        Ok(restored)
    }

    /// Remove the backup directories and whatever is left in them
    pub fn cleanup(&self) -> RunResult<()> {
        for (_, backup) in self.pairs() {
            if backup.exists() {
                let leftover = list_files(&backup)?.len();
                if leftover > 0 {
                    debug!("Dropping {} superseded backup(s) in {}", leftover, backup.display());
                }
                std::fs::remove_dir_all(&backup)?;
            }
        }
        Ok(())
    }
}

/// Delete every entry directly inside `dir`, directories included
fn clear_dir(dir: &Path) -> RunResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let entries = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;

    for entry in &entries {
        if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(entries.len())
}
