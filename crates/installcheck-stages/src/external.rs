use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use installcheck_core::{CommandSpec, HarnessContext, StageVerdict};
use tracing::{info, warn};

use crate::process::{run_tracked, tail_lines, write_run_log, LOG_EXCERPT_LINES};

/// One invocation of the installer or uninstaller under test.
pub(crate) struct ExternalRun<'a> {
    pub label: &'a str,
    pub spec: &'a CommandSpec,
    pub extra_args: &'a [String],
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    pub log_name: &'a str,
}

impl ExternalRun<'_> {
    fn command(&self, ctx: &HarnessContext) -> Command {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .args(self.extra_args)
            .current_dir(ctx.workdir());
        command
    }

    fn command_line(&self) -> String {
        let mut line = self.spec.display();
        for arg in self.extra_args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Runs `run`, captures its output to the log directory and records the
/// outcome on `verdict`. Returns whether the program exited zero. Only a
/// failure to write the log is a harness error.
pub(crate) fn run_external(
    ctx: &HarnessContext,
    run: &ExternalRun<'_>,
    verdict: &mut StageVerdict,
) -> Result<bool> {
    let log_path = ctx.log_path(run.log_name);
    let command_line = run.command_line();
    info!(command = %command_line, log = %log_path.display(), "invoking {}", run.label);

    let command = run.command(ctx);
    let captured = match run_tracked(command, run.stdin, run.timeout, ctx.active_child()) {
        Ok(captured) => captured,
        Err(err) => {
            warn!(command = %command_line, error = %format!("{err:#}"), "failed to launch");
            verdict.fail(format!("{} could not be started: {err:#}", run.label));
            return Ok(false);
        }
    };

    write_run_log(&log_path, &command_line, &captured)?;

    if captured.success() {
        verdict.pass(format!("{} completed", run.label));
        return Ok(true);
    }

    verdict.fail(format!(
        "{} failed ({}); log: {}",
        run.label,
        captured.describe_exit(),
        log_path.display()
    ));
    verdict.attach_log(
        &log_path,
        tail_lines(&captured.combined_output(), LOG_EXCERPT_LINES),
    );
    Ok(false)
}
