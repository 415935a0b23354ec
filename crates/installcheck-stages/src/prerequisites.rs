use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use installcheck_core::{parse_runtime_version, HarnessContext, Stage, StageVerdict};
use tracing::debug;

use crate::process::{find_on_path, run_tracked};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime version, dependency manager and installer artifacts. Stops at the
/// first failed check and has no side effects.
pub struct PrerequisiteStage;

impl Stage for PrerequisiteStage {
    fn name(&self) -> &str {
        "Prerequisites Check"
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        let runtime = &ctx.config.runtime;
        let minimum = ctx.config.min_runtime_version()?;

        let mut version_cmd = Command::new(&runtime.program);
        version_cmd.arg("--version");
        let active = ctx.active_child();
        let banner = match run_tracked(version_cmd, None, VERSION_CHECK_TIMEOUT, active) {
            Ok(run) if run.success() => run.combined_output(),
            Ok(run) => {
                verdict.fail(format!(
                    "{} --version failed ({})",
                    runtime.program,
                    run.describe_exit()
                ));
                return Ok(verdict);
            }
            Err(err) => {
                verdict.fail(format!("{} not found: {err:#}", runtime.program));
                return Ok(verdict);
            }
        };
        debug!(banner = banner.trim(), "runtime version banner");

        let version = match parse_runtime_version(&banner) {
            Ok(version) => version,
            Err(err) => {
                verdict.fail(format!("could not read {} version: {err:#}", runtime.program));
                return Ok(verdict);
            }
        };
        if !verdict.check(
            version >= minimum,
            format!("{} {version} >= {minimum}", runtime.program),
            format!("{} {version} < {minimum}", runtime.program),
        ) {
            return Ok(verdict);
        }

        let manager = &ctx.config.dependency_manager;
        let path_var = std::env::var_os("PATH");
        match find_on_path(manager, path_var.as_deref()) {
            Some(location) => {
                verdict.pass(format!("{manager} is installed ({})", location.display()));
            }
            None => {
                verdict.fail(format!("{manager} not found"));
                return Ok(verdict);
            }
        }

        for artifact in &ctx.config.required_artifacts {
            let path = ctx.workdir().join(artifact);
            if !verdict.check(
                path.exists(),
                format!("{artifact} exists"),
                format!("{artifact} not found in {}", ctx.workdir().display()),
            ) {
                return Ok(verdict);
            }
        }

        Ok(verdict)
    }
}
