use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use installcheck_core::HarnessConfig;
use tracing::{info, warn};

use crate::exit_codes;
use crate::render::{render_status_line, OutputStyle, TerminalRenderer};
use crate::MatrixArgs;

const CONTAINER_RUNTIME: &str = "docker";
const VERSION_BUILD_ARG: &str = "PYTHON_VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MatrixOutcome {
    Passed,
    BuildFailed(String),
    RunFailed(String),
}

/// Image build and in-container harness invocation for each runtime version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MatrixPlan {
    /// Container runtime binary that builds and runs the images.
    pub runtime: String,
    pub versions: Vec<String>,
    pub image_prefix: String,
    pub dockerfile: PathBuf,
    pub build_context: PathBuf,
    pub container_command: Vec<String>,
    pub forward: Vec<String>,
}

impl MatrixPlan {
    pub(crate) fn from_config(config: &HarnessConfig, args: &MatrixArgs) -> Result<Self> {
        let versions = if args.versions.is_empty() {
            config.matrix.versions.clone()
        } else {
            args.versions.clone()
        };
        if versions.is_empty() {
            bail!("no runtime versions configured for the matrix");
        }
        if config.matrix.container_command.is_empty() {
            bail!("matrix.container_command must not be empty");
        }

        let build_context = config.workdir.clone();
        let dockerfile = if config.matrix.dockerfile.is_absolute() {
            config.matrix.dockerfile.clone()
        } else {
            build_context.join(&config.matrix.dockerfile)
        };
        Ok(Self {
            runtime: CONTAINER_RUNTIME.to_string(),
            versions,
            image_prefix: config.matrix.image_prefix.clone(),
            dockerfile,
            build_context,
            container_command: config.matrix.container_command.clone(),
            forward: args.forward.clone(),
        })
    }

    pub(crate) fn image_tag(&self, version: &str) -> String {
        format!("{}:{version}", self.image_prefix)
    }

    pub(crate) fn build_args(&self, version: &str) -> Vec<String> {
        vec![
            "build".to_string(),
            "--build-arg".to_string(),
            format!("{VERSION_BUILD_ARG}={version}"),
            "-f".to_string(),
            self.dockerfile.display().to_string(),
            "-t".to_string(),
            self.image_tag(version),
            self.build_context.display().to_string(),
        ]
    }

    pub(crate) fn run_args(&self, version: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            self.image_tag(version),
        ];
        args.extend(self.container_command.iter().cloned());
        args.extend(self.forward.iter().cloned());
        args
    }
}

pub(crate) fn run_matrix(
    config: &HarnessConfig,
    args: &MatrixArgs,
    renderer: TerminalRenderer,
) -> Result<i32> {
    let plan = MatrixPlan::from_config(config, args)?;
    let results = run_versions(&plan, renderer);

    renderer.print_section("Matrix results");
    renderer.print_lines(&format_matrix_table(&results, renderer.style()));
    let all_passed = results
        .iter()
        .all(|(_, outcome)| *outcome == MatrixOutcome::Passed);
    Ok(if all_passed {
        exit_codes::PASSED
    } else {
        exit_codes::STAGE_FAILED
    })
}

/// Every version gets an outcome; one that cannot even launch the runtime
/// does not stop the rest.
pub(crate) fn run_versions(
    plan: &MatrixPlan,
    renderer: TerminalRenderer,
) -> Vec<(String, MatrixOutcome)> {
    let mut results = Vec::with_capacity(plan.versions.len());
    for version in &plan.versions {
        renderer.print_section(&format!("Runtime {version}"));
        let outcome = run_version(plan, version);
        match &outcome {
            MatrixOutcome::Passed => info!(version = %version, "matrix entry passed"),
            MatrixOutcome::BuildFailed(reason) | MatrixOutcome::RunFailed(reason) => {
                warn!(version = %version, reason = %reason, "matrix entry failed");
            }
        }
        results.push((version.clone(), outcome));
    }
    results
}

/// Builds then runs one image with inherited stdio, so the in-container
/// report streams straight to the terminal.
fn run_version(plan: &MatrixPlan, version: &str) -> MatrixOutcome {
    match runtime_status(plan, &plan.build_args(version)) {
        Ok(status) if status.success() => {}
        Ok(status) => return MatrixOutcome::BuildFailed(describe_status(status)),
        Err(err) => return MatrixOutcome::BuildFailed(format!("{err:#}")),
    }
    match runtime_status(plan, &plan.run_args(version)) {
        Ok(status) if status.success() => MatrixOutcome::Passed,
        Ok(status) => MatrixOutcome::RunFailed(describe_status(status)),
        Err(err) => MatrixOutcome::RunFailed(format!("{err:#}")),
    }
}

fn runtime_status(plan: &MatrixPlan, args: &[String]) -> Result<std::process::ExitStatus> {
    info!(args = ?args, "invoking {}", plan.runtime);
    Command::new(&plan.runtime)
        .args(args)
        .current_dir(&plan.build_context)
        .status()
        .with_context(|| format!("failed to launch {} {}", plan.runtime, args.join(" ")))
}

fn describe_status(status: std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

pub(crate) fn format_matrix_table(
    results: &[(String, MatrixOutcome)],
    style: OutputStyle,
) -> Vec<String> {
    let width = results
        .iter()
        .map(|(version, _)| version.len())
        .max()
        .unwrap_or(0)
        .max("version".len());
    let mut lines = vec![format!("{:<width$}  result", "version")];
    for (version, outcome) in results {
        let line = match outcome {
            MatrixOutcome::Passed => render_status_line(style, "ok", "passed"),
            MatrixOutcome::BuildFailed(reason) => {
                render_status_line(style, "fail", &format!("image build failed ({reason})"))
            }
            MatrixOutcome::RunFailed(reason) => {
                render_status_line(style, "fail", &format!("harness failed ({reason})"))
            }
        };
        lines.push(format!("{version:<width$}  {line}"));
    }
    lines
}
