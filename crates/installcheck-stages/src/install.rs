use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use installcheck_core::{HarnessContext, InstallLayout, Stage, StageVerdict};
use installcheck_snapshot::{path_exists, remove_path_if_exists};
use tracing::info;

use crate::external::{run_external, ExternalRun};

const CONFIG_REQUIRED_KEYS: [&str; 2] = ["version", "python_version"];

fn installer_run<'a>(
    ctx: &'a HarnessContext,
    extra_args: &'a [String],
    log_name: &'a str,
) -> ExternalRun<'a> {
    ExternalRun {
        label: "Installation",
        spec: &ctx.config.installer,
        extra_args,
        stdin: None,
        timeout: ctx.config.install_timeout(),
        log_name,
    }
}

fn installer_extra_args(ctx: &HarnessContext) -> Vec<String> {
    if ctx.options.dev {
        vec![ctx.config.dev_flag.clone()]
    } else {
        Vec::new()
    }
}

/// Artifacts the installer must create, with their report labels.
fn expected_artifacts(layout: &InstallLayout) -> Vec<(PathBuf, &'static str)> {
    vec![
        (layout.install_root().to_path_buf(), "Installation directory"),
        (layout.venv_dir(), "Virtual environment"),
        (layout.cli_script_path(), "Main CLI script"),
        (layout.config_file_path(), "Configuration file"),
        (layout.entry_point().to_path_buf(), "Executable wrapper"),
    ]
}

/// Artifact paths currently present, used to compare installs.
pub(crate) fn present_artifacts(layout: &InstallLayout) -> BTreeSet<PathBuf> {
    expected_artifacts(layout)
        .into_iter()
        .map(|(path, _)| path)
        .chain([layout.dependency_repo_dir(), layout.models_dir()])
        .filter(|path| path_exists(path))
        .collect()
}

pub(crate) fn missing_config_keys(
    raw: &str,
) -> std::result::Result<Vec<&'static str>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    Ok(CONFIG_REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| value.get(key).is_none())
        .collect())
}

/// Runs the installer on a clean slate and asserts the resulting layout.
pub struct FreshInstallStage;

impl Stage for FreshInstallStage {
    fn name(&self) -> &str {
        "Fresh Installation"
    }

    fn mutates_install(&self) -> bool {
        true
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        let layout = &ctx.layout;

        if ctx.options.clean {
            for path in layout.tracked_paths() {
                let removed = remove_path_if_exists(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                if removed {
                    info!(path = %path.display(), "removed existing installation for clean run");
                    verdict.info(format!("Removed existing {}", path.display()));
                }
            }
        }

        let extra_args = installer_extra_args(ctx);
        if !run_external(ctx, &installer_run(ctx, &extra_args, "install.log"), &mut verdict)? {
            return Ok(verdict);
        }

        for (path, label) in expected_artifacts(layout) {
            if !verdict.check(
                path_exists(&path),
                format!("{label} created"),
                format!("{label} not found at {}", path.display()),
            ) {
                return Ok(verdict);
            }
        }

        let config_path = layout.config_file_path();
        let raw = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        match missing_config_keys(&raw) {
            Ok(missing) if missing.is_empty() => verdict.pass("Configuration properly saved"),
            Ok(missing) => verdict.fail(format!(
                "Configuration incomplete (missing {})",
                missing.join(", ")
            )),
            Err(err) => verdict.fail(format!("Configuration is not valid JSON: {err}")),
        }

        Ok(verdict)
    }
}

/// Runs the installer over an existing installation; it must succeed and
/// leave every previously present artifact in place.
pub struct ReinstallStage;

impl Stage for ReinstallStage {
    fn name(&self) -> &str {
        "Reinstallation"
    }

    fn mutates_install(&self) -> bool {
        true
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        let layout = &ctx.layout;
        let before = present_artifacts(layout);

        let extra_args = installer_extra_args(ctx);
        let mut run = installer_run(ctx, &extra_args, "reinstall.log");
        run.label = "Reinstallation";
        if !run_external(ctx, &run, &mut verdict)? {
            return Ok(verdict);
        }

        let config = fs::read_to_string(layout.config_file_path()).unwrap_or_default();
        verdict.check(
            !config.trim().is_empty(),
            "Configuration maintained",
            "Configuration missing or empty after reinstall",
        );

        if !verdict.check(
            path_exists(layout.entry_point()) && path_exists(layout.install_root()),
            "Installation intact after reinstall",
            "Installation broken after reinstall",
        ) {
            return Ok(verdict);
        }

        let after = present_artifacts(layout);
        let lost: Vec<String> = before
            .difference(&after)
            .map(|path| path.display().to_string())
            .collect();
        verdict.check(
            lost.is_empty(),
            format!("Reinstall preserved all {} artifacts", before.len()),
            format!("Reinstall removed {}", lost.join(", ")),
        );

        Ok(verdict)
    }
}
