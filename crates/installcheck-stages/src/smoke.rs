use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use installcheck_core::{HarnessContext, SmokeConfig, Stage, StageVerdict};
use tracing::debug;

use crate::process::run_tracked;

/// One way of invoking the entry point, with the output that counts as
/// recognising the product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeAttempt {
    pub label: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub markers: Vec<String>,
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Recognised,
    Unrecognised,
    TimedOut,
    LaunchFailed(String),
}

impl SmokeAttempt {
    pub fn matches(&self, output: &str) -> bool {
        if self.case_insensitive {
            let output = output.to_lowercase();
            self.markers
                .iter()
                .any(|marker| output.contains(&marker.to_lowercase()))
        } else {
            self.markers.iter().any(|marker| output.contains(marker.as_str()))
        }
    }
}

/// Attempts in the order they are tried: the strict help-output check first,
/// then the looser interactive fallback.
pub fn smoke_attempts(config: &SmokeConfig) -> Vec<SmokeAttempt> {
    vec![
        SmokeAttempt {
            label: "Help output".to_string(),
            args: vec![config.help_flag.clone()],
            stdin: None,
            markers: vec![config.help_marker.clone()],
            case_insensitive: false,
        },
        SmokeAttempt {
            label: "Interactive mode".to_string(),
            args: Vec::new(),
            stdin: Some(config.fallback_input.clone()),
            markers: config.fallback_markers.clone(),
            case_insensitive: true,
        },
    ]
}

/// Invokes the installed entry point from the scratch directory; the first
/// attempt that recognises the output wins.
pub struct SmokeStage;

impl Stage for SmokeStage {
    fn name(&self) -> &str {
        "CLI Smoke Test"
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        let entry_point = ctx.layout.entry_point();
        if !entry_point.is_file() {
            verdict.fail(format!("Executable not found at {}", entry_point.display()));
            return Ok(verdict);
        }

        let scratch = ctx.scratch_dir();
        fs::create_dir_all(scratch)
            .with_context(|| format!("failed to create scratch dir {}", scratch.display()))?;

        let timeout = ctx.config.smoke_timeout();
        let mut reasons = Vec::new();
        for attempt in smoke_attempts(&ctx.config.smoke) {
            let mut command = Command::new(entry_point);
            command.args(&attempt.args).current_dir(scratch);
            match run_attempt(ctx, command, &attempt, &mut verdict) {
                AttemptOutcome::Recognised => {
                    verdict.pass(format!("{} works", attempt.label));
                    return Ok(verdict);
                }
                AttemptOutcome::Unrecognised => {
                    verdict.warn(format!("{} - unclear output", attempt.label));
                    reasons.push(format!("{}: unrecognised output", attempt.label));
                }
                AttemptOutcome::TimedOut => {
                    verdict.warn(format!(
                        "{} timed out after {}s",
                        attempt.label,
                        timeout.as_secs()
                    ));
                    reasons.push(format!("{}: timed out", attempt.label));
                }
                AttemptOutcome::LaunchFailed(err) => {
                    verdict.warn(format!("{} could not start: {err}", attempt.label));
                    reasons.push(format!("{}: launch failed", attempt.label));
                }
            }
        }

        verdict.fail(format!("CLI not recognised ({})", reasons.join("; ")));
        Ok(verdict)
    }
}

fn run_attempt(
    ctx: &HarnessContext,
    command: Command,
    attempt: &SmokeAttempt,
    verdict: &mut StageVerdict,
) -> AttemptOutcome {
    let stdin = attempt.stdin.as_deref().map(str::as_bytes);
    let timeout = ctx.config.smoke_timeout();
    let run = match run_tracked(command, stdin, timeout, ctx.active_child()) {
        Ok(run) => run,
        Err(err) => return AttemptOutcome::LaunchFailed(format!("{err:#}")),
    };
    if run.timed_out() {
        return AttemptOutcome::TimedOut;
    }

    let output = run.combined_output();
    if attempt.matches(&output) {
        return AttemptOutcome::Recognised;
    }
    debug!(attempt = %attempt.label, output = %output.trim(), "smoke output not recognised");
    if ctx.options.verbose {
        let preview: String = output.chars().take(200).collect();
        verdict.info(format!("Output: {}", preview.trim()));
    }
    AttemptOutcome::Unrecognised
}
