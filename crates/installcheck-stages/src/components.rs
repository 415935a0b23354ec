use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use installcheck_core::{HarnessContext, Stage, StageVerdict};
use tracing::debug;

use crate::process::run_tracked;

const IMPORT_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

/// Packages, cloned dependency repository and model files. Every sub-check
/// runs even after an earlier one failed.
pub struct ComponentStage;

impl Stage for ComponentStage {
    fn name(&self) -> &str {
        "Component Verification"
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        check_packages(ctx, &mut verdict);
        check_dependency_repo(ctx, &mut verdict)?;
        check_models(ctx, &mut verdict)?;
        Ok(verdict)
    }
}

fn check_packages(ctx: &HarnessContext, verdict: &mut StageVerdict) {
    let interpreter = ctx.layout.venv_python();
    let active = ctx.active_child();
    for package in &ctx.config.packages {
        let mut import_cmd = Command::new(&interpreter);
        import_cmd.arg("-c").arg(format!("import {}", package.module));
        let importable = match run_tracked(import_cmd, None, IMPORT_CHECK_TIMEOUT, active) {
            Ok(run) => {
                if !run.success() {
                    debug!(
                        module = %package.module,
                        stderr = %run.stderr.trim(),
                        "import failed"
                    );
                }
                run.success()
            }
            Err(err) => {
                debug!(
                    module = %package.module,
                    error = %format!("{err:#}"),
                    "import check failed"
                );
                false
            }
        };
        verdict.check(
            importable,
            format!("{} installed", package.label),
            format!("{} not found", package.label),
        );
    }
}

fn check_dependency_repo(ctx: &HarnessContext, verdict: &mut StageVerdict) -> Result<()> {
    let repo_dir = ctx.layout.dependency_repo_dir();
    let repo_name = dir_label(&repo_dir);
    if !repo_dir.is_dir() {
        verdict.fail(format!("{repo_name} repository not found"));
        return Ok(());
    }
    verdict.pass(format!("{repo_name} repository present"));

    for key_file in &ctx.config.repo_key_files {
        let found = contains_entry_with_prefix(&repo_dir, key_file)
            .with_context(|| format!("failed to scan {}", repo_dir.display()))?;
        if found {
            verdict.pass(format!("{repo_name} {key_file} found"));
        } else {
            verdict.warn(format!("{repo_name} {key_file} not found"));
        }
    }
    Ok(())
}

fn check_models(ctx: &HarnessContext, verdict: &mut StageVerdict) -> Result<()> {
    let models_dir = ctx.layout.models_dir();
    if !models_dir.is_dir() {
        verdict.fail("Models directory not found");
        return Ok(());
    }

    let models = list_model_files(&models_dir, &ctx.config.model_extension)?;
    let minimum = ctx.config.min_model_files;
    if models.len() >= minimum {
        verdict.pass(format!("AI models present ({} files)", models.len()));
        for (path, size) in &models {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            verdict.info(format!("{name}: {:.1} MB", *size as f64 / 1024.0 / 1024.0));
        }
    } else {
        verdict.fail(format!(
            "Incomplete models ({} files, expected at least {minimum})",
            models.len()
        ));
    }
    Ok(())
}

fn dir_label(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Model files directly inside `dir` with the given extension, sorted by
/// name, paired with their size in bytes.
pub(crate) fn list_model_files(dir: &Path, extension: &str) -> Result<Vec<(PathBuf, u64)>> {
    let mut models = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy() == extension);
        if matches && entry.file_type()?.is_file() {
            models.push((path, entry.metadata()?.len()));
        }
    }
    models.sort();
    Ok(models)
}

/// Whether any entry below `dir`, at any depth, has a name starting with
/// `prefix`.
pub(crate) fn contains_entry_with_prefix(dir: &Path, prefix: &str) -> io::Result<bool> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                return Ok(true);
            }
            if entry.file_type()?.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(false)
}
