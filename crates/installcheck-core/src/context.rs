use std::path::{Path, PathBuf};

use crate::child::ActiveChild;
use crate::config::{expand_home, HarnessConfig, RunOptions};
use crate::layout::InstallLayout;
use crate::report::{ExecutionReport, StageRecord, StageStatus};

/// State threaded through one harness run: configuration, the resolved
/// layout, the short-circuit flag and the report being built.
#[derive(Debug)]
pub struct HarnessContext {
    pub config: HarnessConfig,
    pub options: RunOptions,
    pub layout: InstallLayout,
    workdir: PathBuf,
    log_dir: PathBuf,
    scratch_dir: PathBuf,
    active_child: ActiveChild,
    failed: bool,
    report: ExecutionReport,
}

impl HarnessContext {
    pub fn new(config: HarnessConfig, options: RunOptions, home: &Path) -> Self {
        let layout = config.resolve_layout(home);
        let workdir = expand_home(&config.workdir, home);
        let log_dir = expand_home(&config.log_dir, home);
        let scratch_dir =
            std::env::temp_dir().join(format!("installcheck-scratch-{}", std::process::id()));
        Self {
            config,
            options,
            layout,
            workdir,
            log_dir,
            scratch_dir,
            active_child: ActiveChild::default(),
            failed: false,
            report: ExecutionReport::new(),
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(name)
    }

    /// Harness-private directory, removed by the cleanup finalizer.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// The external process currently being waited on. The cleanup
    /// finalizer holds a clone and stops it before restoring.
    pub fn active_child(&self) -> &ActiveChild {
        &self.active_child
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn report(&self) -> &ExecutionReport {
        &self.report
    }

    pub fn into_report(self) -> ExecutionReport {
        self.report
    }

    pub(crate) fn record(&mut self, record: StageRecord) {
        if record.status == StageStatus::Failed {
            self.failed = true;
        }
        self.report.push(record);
    }
}
