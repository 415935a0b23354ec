use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::layout::InstallLayout;

/// Harness configuration. Every field has a default matching the UFPS
/// installer, so an empty TOML document is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub install_root: PathBuf,
    pub entry_point: PathBuf,
    /// Directory holding the installer artifacts; installer and uninstaller
    /// run with it as their working directory.
    pub workdir: PathBuf,
    pub log_dir: PathBuf,
    pub runtime: RuntimeConfig,
    pub dependency_manager: String,
    pub required_artifacts: Vec<String>,
    pub installer: CommandSpec,
    pub uninstaller: CommandSpec,
    pub dev_flag: String,
    pub install_timeout_secs: u64,
    pub uninstall_timeout_secs: u64,
    pub packages: Vec<PackageCheck>,
    pub repo_key_files: Vec<String>,
    pub model_extension: String,
    pub min_model_files: usize,
    pub smoke: SmokeConfig,
    pub matrix: MatrixConfig,
    pub keep_test_install: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub program: String,
    pub min_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageCheck {
    pub module: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SmokeConfig {
    pub help_flag: String,
    pub help_marker: String,
    pub fallback_input: String,
    pub fallback_markers: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MatrixConfig {
    pub versions: Vec<String>,
    pub image_prefix: String,
    pub dockerfile: PathBuf,
    pub container_command: Vec<String>,
}

/// Per-invocation switches; these come from the command line, not the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub verbose: bool,
    pub clean: bool,
    pub quick: bool,
    pub dev: bool,
    pub json: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("~/.ufps"),
            entry_point: PathBuf::from("~/.local/bin/ufps"),
            workdir: PathBuf::from("."),
            log_dir: PathBuf::from("installcheck-logs"),
            runtime: RuntimeConfig::default(),
            dependency_manager: "git".to_string(),
            required_artifacts: vec![
                "install.py".to_string(),
                "uninstall.py".to_string(),
                "pyproject.toml".to_string(),
            ],
            installer: CommandSpec::python("install.py"),
            uninstaller: CommandSpec::python("uninstall.py"),
            dev_flag: "--dev".to_string(),
            install_timeout_secs: 60 * 60,
            uninstall_timeout_secs: 5 * 60,
            packages: default_packages(),
            repo_key_files: vec![
                "inference_video.py".to_string(),
                "inference_img.py".to_string(),
                "model".to_string(),
            ],
            model_extension: "pkl".to_string(),
            min_model_files: 3,
            smoke: SmokeConfig::default(),
            matrix: MatrixConfig::default(),
            keep_test_install: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            min_version: "3.8".to_string(),
        }
    }
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            help_flag: "--help".to_string(),
            help_marker: "UFPS".to_string(),
            fallback_input: "q\n".to_string(),
            fallback_markers: vec![
                "ufps".to_string(),
                "video".to_string(),
                "ultra fps".to_string(),
            ],
            timeout_secs: 10,
        }
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            versions: ["3.8", "3.9", "3.10", "3.11", "3.12"]
                .iter()
                .map(|version| version.to_string())
                .collect(),
            image_prefix: "installcheck".to_string(),
            dockerfile: PathBuf::from("Dockerfile"),
            container_command: vec!["installcheck".to_string(), "run".to_string()],
        }
    }
}

impl CommandSpec {
    fn python(script: &str) -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![script.to_string()],
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn default_packages() -> Vec<PackageCheck> {
    [
        ("torch", "PyTorch"),
        ("torchvision", "TorchVision"),
        ("cv2", "OpenCV"),
        ("numpy", "NumPy"),
        ("PIL", "Pillow"),
        ("rich", "Rich (CLI formatting)"),
        ("questionary", "Questionary (CLI prompts)"),
    ]
    .iter()
    .map(|(module, label)| PackageCheck {
        module: module.to_string(),
        label: label.to_string(),
    })
    .collect()
}

impl HarnessConfig {
    /// Loads the file at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read harness config: {}", path.display()))?;
        parse_config(&raw)
            .with_context(|| format!("failed to load harness config: {}", path.display()))
    }

    pub fn resolve_layout(&self, home: &Path) -> InstallLayout {
        InstallLayout::new(
            expand_home(&self.install_root, home),
            expand_home(&self.entry_point, home),
        )
    }

    pub fn min_runtime_version(&self) -> Result<Version> {
        parse_runtime_version(&self.runtime.min_version).with_context(|| {
            format!(
                "invalid runtime.min_version '{}'",
                self.runtime.min_version
            )
        })
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn uninstall_timeout(&self) -> Duration {
        Duration::from_secs(self.uninstall_timeout_secs)
    }

    pub fn smoke_timeout(&self) -> Duration {
        Duration::from_secs(self.smoke.timeout_secs)
    }
}

pub fn parse_config(raw: &str) -> Result<HarnessConfig> {
    let config: HarnessConfig =
        toml::from_str(raw).context("failed to parse harness config")?;
    config.min_runtime_version()?;
    if config.installer.program.trim().is_empty() {
        return Err(anyhow!("installer.program must not be empty"));
    }
    if config.uninstaller.program.trim().is_empty() {
        return Err(anyhow!("uninstaller.program must not be empty"));
    }
    if config.smoke.timeout_secs == 0 {
        return Err(anyhow!("smoke.timeout_secs must be greater than zero"));
    }
    if config.model_extension.starts_with('.') {
        return Err(anyhow!(
            "model_extension must not start with '.': {}",
            config.model_extension
        ));
    }
    Ok(config)
}

/// Expands a leading `~` component against `home`.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Parses interpreter-style versions such as `3.8`, `3.11.4` or
/// `Python 3.12.0rc1` into a semver triple.
pub fn parse_runtime_version(raw: &str) -> Result<Version> {
    let token = raw
        .split_whitespace()
        .find(|part| part.starts_with(|ch: char| ch.is_ascii_digit()))
        .ok_or_else(|| anyhow!("no version number found in '{}'", raw.trim()))?;

    let mut numbers = token.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u64>().ok()
    });
    let major = numbers
        .next()
        .flatten()
        .ok_or_else(|| anyhow!("invalid major version in '{token}'"))?;
    let minor = numbers.next().flatten().unwrap_or(0);
    let patch = numbers.next().flatten().unwrap_or(0);
    Ok(Version::new(major, minor, patch))
}
