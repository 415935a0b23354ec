mod finalizer;
mod fs_utils;
mod snapshot;

pub use finalizer::{CleanupFinalizer, CleanupOutcome, FinalizerGuard};
pub use fs_utils::{path_exists, remove_path_if_exists};
pub use snapshot::{backup, backup_path_for, BackupSnapshot, RestoreReport, SnapshotEntry};

#[cfg(test)]
mod tests;
