use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use installcheck_core::ActiveChild;
use tracing::{debug, info, warn};

use crate::snapshot::{backup, BackupSnapshot, SnapshotEntry};

/// What one finalizer run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// An external process was still running and had to be stopped first.
    pub stopped_child: bool,
    pub scratch_removed: bool,
    pub restored: Vec<PathBuf>,
    pub retained: Vec<SnapshotEntry>,
    pub failures: Vec<String>,
}

#[derive(Debug)]
struct FinalizerState {
    scratch_dir: PathBuf,
    keep_test_install: bool,
    snapshot: Option<BackupSnapshot>,
    active_child: ActiveChild,
    finished: bool,
}

/// Exactly-once teardown shared between the main thread and the interrupt
/// handler. Clones refer to the same state.
#[derive(Debug, Clone)]
pub struct CleanupFinalizer {
    state: Arc<Mutex<FinalizerState>>,
}

impl CleanupFinalizer {
    pub fn new(scratch_dir: impl Into<PathBuf>, keep_test_install: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(FinalizerState {
                scratch_dir: scratch_dir.into(),
                keep_test_install,
                snapshot: None,
                active_child: ActiveChild::default(),
                finished: false,
            })),
        }
    }

    /// Shares the handle stages register their external processes on, so a
    /// run from the interrupt handler stops the process before restoring.
    pub fn with_active_child(self, active_child: ActiveChild) -> Self {
        self.lock().active_child = active_child;
        self
    }

    /// Moves `paths` aside unless a snapshot was already taken. Returns
    /// `true` when this call took the snapshot.
    pub fn take_snapshot(&self, paths: &[PathBuf]) -> Result<bool> {
        let mut state = self.lock();
        if state.finished {
            return Err(anyhow!("cleanup already ran; refusing to take a snapshot"));
        }
        if state.snapshot.is_some() {
            return Ok(false);
        }
        let snapshot = backup(paths).context("failed to snapshot existing installation")?;
        state.snapshot = Some(snapshot);
        Ok(true)
    }

    pub fn snapshot_entries(&self) -> Vec<SnapshotEntry> {
        self.lock()
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.entries().to_vec())
            .unwrap_or_default()
    }

    pub fn has_run(&self) -> bool {
        self.lock().finished
    }

    /// Stops any running external process, removes the scratch directory,
    /// then restores (or retains) the snapshot. Returns `None` when cleanup
    /// already ran.
    pub fn run(&self) -> Option<CleanupOutcome> {
        let mut state = self.lock();
        if state.finished {
            debug!("cleanup already ran");
            return None;
        }
        state.finished = true;

        let mut outcome = CleanupOutcome::default();
        if state.active_child.terminate() {
            warn!("stopped a running external process before restoring");
            outcome.stopped_child = true;
        }
        match remove_scratch_dir(&state.scratch_dir) {
            Ok(removed) => outcome.scratch_removed = removed,
            Err(err) => outcome.failures.push(format!("{err:#}")),
        }

        if let Some(mut snapshot) = state.snapshot.take() {
            if state.keep_test_install {
                outcome.retained = snapshot.retain();
                for entry in &outcome.retained {
                    info!(
                        path = %entry.original.display(),
                        backup = %entry.backup.display(),
                        "keeping test installation; original left at backup location"
                    );
                }
            } else {
                let report = snapshot.restore();
                outcome.restored = report.restored;
                outcome.failures.extend(report.failures);
            }
        }

        Some(outcome)
    }

    /// Scoped handle that runs the finalizer when dropped.
    pub fn guard(&self) -> FinalizerGuard {
        FinalizerGuard {
            finalizer: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FinalizerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_scratch_dir(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove scratch directory");
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

/// Runs the finalizer on drop, covering early returns and unwinding.
#[must_use = "dropping the guard immediately runs cleanup"]
pub struct FinalizerGuard {
    finalizer: CleanupFinalizer,
}

impl FinalizerGuard {
    /// Runs cleanup now and hands back its outcome; the later drop is a no-op.
    pub fn finish(self) -> Option<CleanupOutcome> {
        self.finalizer.run()
    }
}

impl Drop for FinalizerGuard {
    fn drop(&mut self) {
        if let Some(outcome) = self.finalizer.run() {
            for failure in &outcome.failures {
                warn!(error = %failure, "cleanup failure during unwind");
            }
        }
    }
}
