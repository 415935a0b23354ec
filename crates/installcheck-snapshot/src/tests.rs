use super::*;
use installcheck_core::ActiveChild;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "installcheck-snapshot-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

struct Install {
    root: PathBuf,
    install_root: PathBuf,
    entry_point: PathBuf,
}

impl Install {
    fn new() -> Self {
        let root = test_root();
        Self {
            install_root: root.join("home").join(".ufps"),
            entry_point: root.join("home").join(".local").join("bin").join("ufps"),
            root,
        }
    }

    fn seed_original(&self) {
        fs::create_dir_all(self.install_root.join("venv")).expect("must create venv");
        fs::write(self.install_root.join("config.json"), "{\"version\":\"0.9\"}")
            .expect("must write config");
        fs::create_dir_all(self.entry_point.parent().expect("parent")).expect("must create bin");
        fs::write(&self.entry_point, "#!/bin/sh\necho original\n").expect("must write wrapper");
    }

    fn seed_test_install(&self) {
        fs::create_dir_all(self.install_root.join("models")).expect("must create models");
        fs::write(self.install_root.join("config.json"), "{\"version\":\"1.0.0\"}")
            .expect("must write config");
        fs::create_dir_all(self.entry_point.parent().expect("parent")).expect("must create bin");
        fs::write(&self.entry_point, "#!/bin/sh\necho test\n").expect("must write wrapper");
    }

    fn tracked(&self) -> Vec<PathBuf> {
        vec![self.install_root.clone(), self.entry_point.clone()]
    }
}

impl Drop for Install {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[test]
fn backup_path_is_hidden_sibling_keyed_by_pid() {
    let backup = backup_path_for(Path::new("/home/tester/.ufps"), 4242).expect("must derive");
    assert_eq!(
        backup,
        PathBuf::from("/home/tester/..ufps.installcheck-backup-4242")
    );

    let backup =
        backup_path_for(Path::new("/home/tester/.local/bin/ufps"), 7).expect("must derive");
    assert_eq!(
        backup,
        PathBuf::from("/home/tester/.local/bin/.ufps.installcheck-backup-7")
    );

    assert!(backup_path_for(Path::new("/"), 1).is_err());
}

#[test]
fn backup_then_restore_round_trips_existing_installation() {
    let install = Install::new();
    install.seed_original();

    let mut snapshot = backup(&install.tracked()).expect("backup must succeed");
    assert!(snapshot.has_pending());
    assert!(!install.install_root.exists(), "original must be moved aside");
    assert!(!install.entry_point.exists(), "wrapper must be moved aside");
    assert!(snapshot.entries().iter().all(|entry| entry.existed));
    assert!(snapshot.entries().iter().all(|entry| entry.backup.exists()));

    install.seed_test_install();
    let report = snapshot.restore();

    assert!(report.failures.is_empty(), "unexpected: {:?}", report.failures);
    assert_eq!(report.restored, install.tracked());
    assert_eq!(
        fs::read_to_string(install.install_root.join("config.json")).expect("config"),
        "{\"version\":\"0.9\"}"
    );
    assert!(install.install_root.join("venv").is_dir());
    assert!(
        !install.install_root.join("models").exists(),
        "test install leftovers must be replaced, not merged"
    );
    assert_eq!(
        fs::read_to_string(&install.entry_point).expect("wrapper"),
        "#!/bin/sh\necho original\n"
    );
    assert!(snapshot.entries().iter().all(|entry| !entry.backup.exists()));
}

#[test]
fn backup_records_absent_paths_and_restore_leaves_them_alone() {
    let install = Install::new();

    let mut snapshot = backup(&install.tracked()).expect("backup must succeed");
    assert!(!snapshot.has_pending());
    assert!(snapshot.entries().iter().all(|entry| !entry.existed));

    install.seed_test_install();
    let report = snapshot.restore();

    assert!(report.restored.is_empty());
    assert!(report.failures.is_empty());
    assert!(
        install.install_root.exists(),
        "restore must not delete paths that did not exist before backup"
    );
}

#[test]
fn restore_is_idempotent() {
    let install = Install::new();
    install.seed_original();

    let mut snapshot = backup(&install.tracked()).expect("backup must succeed");
    let first = snapshot.restore();
    assert_eq!(first.restored.len(), 2);

    fs::write(install.install_root.join("marker"), "after restore").expect("must write marker");
    let second = snapshot.restore();

    assert!(second.restored.is_empty());
    assert!(second.failures.is_empty());
    assert!(install.install_root.join("marker").exists());
}

#[test]
fn restore_failure_is_reported_not_raised_and_stays_pending() {
    let install = Install::new();
    install.seed_original();

    let mut snapshot = backup(&install.tracked()).expect("backup must succeed");
    let wrapper_backup = snapshot.entries()[1].backup.clone();
    fs::remove_file(&wrapper_backup).expect("simulate lost backup");

    let report = snapshot.restore();

    assert_eq!(report.restored, vec![install.install_root.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("failed to move"));
    assert!(snapshot.has_pending());
}

#[test]
fn backup_refuses_occupied_backup_location_and_undoes_partial_moves() {
    let install = Install::new();
    install.seed_original();
    let occupied = backup_path_for(&install.entry_point, std::process::id()).expect("derive");
    fs::write(&occupied, "stale").expect("must seed stale backup");

    let err = backup(&install.tracked()).expect_err("occupied backup location must fail");

    assert!(
        err.to_string().contains("backup location already occupied"),
        "unexpected: {err}"
    );
    assert!(
        install.install_root.join("venv").is_dir(),
        "install root moved by the failed call must be put back"
    );
    assert!(install.entry_point.is_file());
}

#[test]
fn retain_hands_back_displaced_entries_without_moving_them() {
    let install = Install::new();
    install.seed_original();

    let snapshot = backup(&install.tracked()).expect("backup must succeed");
    let retained = snapshot.retain();

    assert_eq!(retained.len(), 2);
    assert!(retained.iter().all(|entry| entry.backup.exists()));
    assert!(!install.install_root.exists());
}

#[test]
fn finalizer_runs_exactly_once() {
    let install = Install::new();
    install.seed_original();
    let scratch = install.root.join("scratch");
    fs::create_dir_all(&scratch).expect("must create scratch");

    let finalizer = CleanupFinalizer::new(&scratch, false);
    assert!(finalizer
        .take_snapshot(&install.tracked())
        .expect("snapshot must succeed"));
    assert!(!finalizer
        .take_snapshot(&install.tracked())
        .expect("second request is a no-op"));
    install.seed_test_install();

    let handler_view = finalizer.clone();
    let outcome = finalizer.run().expect("first run must execute");
    assert!(outcome.scratch_removed);
    assert_eq!(outcome.restored, install.tracked());
    assert!(outcome.failures.is_empty());
    assert!(!scratch.exists());

    assert!(handler_view.run().is_none(), "clones share the exactly-once flag");
    assert!(finalizer.run().is_none());
    assert!(finalizer.has_run());
    assert!(install.install_root.join("venv").is_dir());
}

#[test]
fn finalizer_guard_runs_on_early_return() {
    let install = Install::new();
    install.seed_original();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), false);

    let aborted = || -> anyhow::Result<()> {
        let _guard = finalizer.guard();
        finalizer.take_snapshot(&install.tracked())?;
        install.seed_test_install();
        anyhow::bail!("stage crashed");
    };
    assert!(aborted().is_err());

    assert!(finalizer.has_run());
    assert_eq!(
        fs::read_to_string(&install.entry_point).expect("wrapper"),
        "#!/bin/sh\necho original\n"
    );
}

#[test]
fn finalizer_guard_finish_returns_outcome_and_drop_is_noop() {
    let install = Install::new();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), false);
    let guard = finalizer.guard();

    let outcome = guard.finish().expect("first finish must run");

    assert!(!outcome.scratch_removed);
    assert!(outcome.restored.is_empty());
    assert!(finalizer.run().is_none());
}

#[test]
fn finalizer_refuses_snapshot_after_cleanup() {
    let install = Install::new();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), false);
    finalizer.run();

    let err = finalizer
        .take_snapshot(&install.tracked())
        .expect_err("snapshot after cleanup must fail");
    assert!(err.to_string().contains("cleanup already ran"));
}

#[test]
fn finalizer_keep_test_install_retains_backup() {
    let install = Install::new();
    install.seed_original();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), true);
    finalizer
        .take_snapshot(&install.tracked())
        .expect("snapshot must succeed");
    install.seed_test_install();

    let outcome = finalizer.run().expect("must run");

    assert!(outcome.restored.is_empty());
    assert_eq!(outcome.retained.len(), 2);
    assert!(install.install_root.join("models").is_dir(), "test install stays");
    assert!(outcome.retained.iter().all(|entry| entry.backup.exists()));
}

#[cfg(unix)]
#[test]
fn finalizer_stops_running_installer_before_restoring() {
    let install = Install::new();
    install.seed_original();
    let active = ActiveChild::default();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), false)
        .with_active_child(active.clone());
    finalizer
        .take_snapshot(&install.tracked())
        .expect("snapshot must succeed");
    install.seed_test_install();

    // Stands in for an installer that is still writing when cleanup starts.
    let child = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg("sleep 1; rm -rf \"$1\"; mkdir -p \"$1\"; echo late > \"$1/late.txt\"")
        .arg("sh")
        .arg(&install.install_root)
        .spawn()
        .expect("must spawn installer stand-in");
    active.attach(child).expect("must attach");

    let outcome = finalizer.run().expect("must run");
    std::thread::sleep(std::time::Duration::from_millis(1500));

    assert!(outcome.stopped_child);
    assert_eq!(outcome.restored.len(), 2);
    assert_eq!(
        fs::read_to_string(install.install_root.join("config.json")).expect("original config"),
        "{\"version\":\"0.9\"}"
    );
    assert!(!install.install_root.join("late.txt").exists());
    assert!(active.is_closed());
}

#[test]
fn finalizer_without_running_child_reports_nothing_stopped() {
    let install = Install::new();
    let finalizer = CleanupFinalizer::new(install.root.join("scratch"), false)
        .with_active_child(ActiveChild::default());

    let outcome = finalizer.run().expect("must run");

    assert!(!outcome.stopped_child);
}

#[test]
fn remove_path_if_exists_handles_files_dirs_and_absence() {
    let install = Install::new();
    install.seed_original();

    assert!(remove_path_if_exists(&install.install_root).expect("dir"));
    assert!(remove_path_if_exists(&install.entry_point).expect("file"));
    assert!(!remove_path_if_exists(&install.entry_point).expect("absent"));
    assert!(!path_exists(&install.install_root));
}
