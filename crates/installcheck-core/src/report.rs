use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckLine {
    pub status: CheckStatus,
    pub message: String,
}

/// Tail of a captured external-program log, surfaced when a stage fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogExcerpt {
    pub path: PathBuf,
    pub text: String,
}

/// Result of executing one stage predicate. The stage passed iff no check
/// line failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageVerdict {
    checks: Vec<CheckLine>,
    log: Option<LogExcerpt>,
}

impl StageVerdict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, message: impl Into<String>) {
        self.push(CheckStatus::Pass, message);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.push(CheckStatus::Fail, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(CheckStatus::Warn, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(CheckStatus::Info, message);
    }

    /// Records `message` as a pass or a failure depending on `ok`, returning `ok`.
    pub fn check(
        &mut self,
        ok: bool,
        pass_message: impl Into<String>,
        fail_message: impl Into<String>,
    ) -> bool {
        if ok {
            self.pass(pass_message);
        } else {
            self.fail(fail_message);
        }
        ok
    }

    pub fn attach_log(&mut self, path: &Path, text: impl Into<String>) {
        self.log = Some(LogExcerpt {
            path: path.to_path_buf(),
            text: text.into(),
        });
    }

    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|check| check.status != CheckStatus::Fail)
    }

    pub fn checks(&self) -> &[CheckLine] {
        &self.checks
    }

    pub fn log(&self) -> Option<&LogExcerpt> {
        self.log.as_ref()
    }

    fn push(&mut self, status: CheckStatus, message: impl Into<String>) {
        self.checks.push(CheckLine {
            status,
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub checks: Vec<CheckLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogExcerpt>,
}

impl StageRecord {
    pub fn executed(name: &str, verdict: StageVerdict) -> Self {
        let status = if verdict.passed() {
            StageStatus::Passed
        } else {
            StageStatus::Failed
        };
        Self {
            name: name.to_string(),
            status,
            checks: verdict.checks,
            log: verdict.log,
        }
    }

    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Skipped,
            checks: Vec::new(),
            log: None,
        }
    }
}

/// Ordered stage results for one harness run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    stages: Vec<StageRecord>,
}

impl ExecutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Logical AND over executed stages; skipped stages only ever follow a
    /// failure, so they cannot make an otherwise failed report pass.
    pub fn passed(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.status == StageStatus::Passed)
    }

    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Failed)
    }

    pub fn skipped_stages(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Skipped)
    }

    /// `(passed, failed)` counts over every check line in the report.
    pub fn check_counts(&self) -> (usize, usize) {
        let mut passed = 0;
        let mut failed = 0;
        for check in self.stages.iter().flat_map(|stage| &stage.checks) {
            match check.status {
                CheckStatus::Pass => passed += 1,
                CheckStatus::Fail => failed += 1,
                CheckStatus::Warn | CheckStatus::Info => {}
            }
        }
        (passed, failed)
    }

    pub fn failed_checks(&self) -> Vec<&CheckLine> {
        self.stages
            .iter()
            .flat_map(|stage| &stage.checks)
            .filter(|check| check.status == CheckStatus::Fail)
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn stages_with(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|stage| stage.status == status)
            .map(|stage| stage.name.as_str())
            .collect()
    }
}
