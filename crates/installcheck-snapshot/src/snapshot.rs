use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::fs_utils::{path_exists, remove_path_if_exists};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub existed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub failures: Vec<String>,
}

/// Pre-existing installation entries moved aside for the duration of a run.
#[derive(Debug)]
pub struct BackupSnapshot {
    entries: Vec<SnapshotEntry>,
    pending: Vec<bool>,
}

/// Sibling location `original` is renamed to. Staying in the same directory
/// keeps the move a single rename on one filesystem.
pub fn backup_path_for(original: &Path, pid: u32) -> Result<PathBuf> {
    let file_name = original.file_name().ok_or_else(|| {
        anyhow!(
            "cannot back up path without a file name: {}",
            original.display()
        )
    })?;
    let parent = original.parent().ok_or_else(|| {
        anyhow!(
            "cannot back up path without a parent: {}",
            original.display()
        )
    })?;

    let mut backup_name = OsString::from(".");
    backup_name.push(file_name);
    backup_name.push(format!(".installcheck-backup-{pid}"));
    Ok(parent.join(backup_name))
}

/// Moves every existing path in `paths` aside. On failure, entries already
/// moved by this call are put back before the error is returned.
pub fn backup(paths: &[PathBuf]) -> Result<BackupSnapshot> {
    let pid = std::process::id();
    let mut entries = Vec::with_capacity(paths.len());

    for original in paths {
        let backup = backup_path_for(original, pid)?;
        if !path_exists(original) {
            debug!(path = %original.display(), "nothing to back up");
            entries.push(SnapshotEntry {
                original: original.clone(),
                backup,
                existed: false,
            });
            continue;
        }

        if let Err(err) = move_aside(original, &backup) {
            rollback_partial_backup(&entries);
            return Err(err);
        }
        info!(
            path = %original.display(),
            backup = %backup.display(),
            "moved existing installation aside"
        );
        entries.push(SnapshotEntry {
            original: original.clone(),
            backup,
            existed: true,
        });
    }

    let pending = entries.iter().map(|entry| entry.existed).collect();
    Ok(BackupSnapshot { entries, pending })
}

fn move_aside(original: &Path, backup: &Path) -> Result<()> {
    if path_exists(backup) {
        return Err(anyhow!(
            "backup location already occupied: {}",
            backup.display()
        ));
    }
    fs::rename(original, backup).with_context(|| {
        format!(
            "failed to move {} aside to {}",
            original.display(),
            backup.display()
        )
    })
}

fn rollback_partial_backup(entries: &[SnapshotEntry]) {
    for entry in entries.iter().filter(|entry| entry.existed) {
        if let Err(err) = fs::rename(&entry.backup, &entry.original) {
            warn!(
                path = %entry.original.display(),
                error = %err,
                "failed to undo partial backup"
            );
        }
    }
}

impl BackupSnapshot {
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Whether any entry is still displaced and awaiting restoration.
    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|pending| *pending)
    }

    /// Puts every displaced entry back, replacing whatever now occupies the
    /// original location. Failures are logged and returned, never raised;
    /// entries already restored are not touched again.
    pub fn restore(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (entry, pending) in self.entries.iter().zip(self.pending.iter_mut()) {
            if !*pending {
                continue;
            }
            match restore_entry(entry) {
                Ok(()) => {
                    info!(path = %entry.original.display(), "restored original installation");
                    *pending = false;
                    report.restored.push(entry.original.clone());
                }
                Err(err) => {
                    warn!(
                        path = %entry.original.display(),
                        error = %format!("{err:#}"),
                        "failed to restore original installation"
                    );
                    report.failures.push(format!("{err:#}"));
                }
            }
        }
        report
    }

    /// Gives up restoration and returns the entries still held at their
    /// backup locations.
    pub fn retain(self) -> Vec<SnapshotEntry> {
        self.entries
            .into_iter()
            .zip(self.pending)
            .filter_map(|(entry, pending)| pending.then_some(entry))
            .collect()
    }
}

fn restore_entry(entry: &SnapshotEntry) -> Result<()> {
    remove_path_if_exists(&entry.original).with_context(|| {
        format!(
            "failed to clear {} before restoring",
            entry.original.display()
        )
    })?;
    if let Some(parent) = entry.original.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::rename(&entry.backup, &entry.original).with_context(|| {
        format!(
            "failed to move {} back to {}",
            entry.backup.display(),
            entry.original.display()
        )
    })
}
