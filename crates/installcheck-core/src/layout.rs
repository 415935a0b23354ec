use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Filesystem surface the installer under test is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    install_root: PathBuf,
    entry_point: PathBuf,
}

impl InstallLayout {
    pub fn new(install_root: impl Into<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            entry_point: entry_point.into(),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.install_root.join("venv")
    }

    pub fn cli_script_path(&self) -> PathBuf {
        self.install_root.join("cli.py")
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.install_root.join("config.json")
    }

    pub fn dependency_repo_dir(&self) -> PathBuf {
        self.install_root.join("RIFE")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.install_root.join("models")
    }

    /// Interpreter inside the isolated environment. Falls back to the Windows
    /// layout when the POSIX one is absent.
    pub fn venv_python(&self) -> PathBuf {
        let posix = self.venv_dir().join("bin").join("python");
        if posix.exists() {
            return posix;
        }
        let windows = self.venv_dir().join("Scripts").join("python.exe");
        if windows.exists() {
            return windows;
        }
        posix
    }

    /// Paths displaced by the snapshot store before a destructive stage.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        vec![self.install_root.clone(), self.entry_point.clone()]
    }
}

pub fn default_user_home() -> Result<PathBuf> {
    if cfg!(windows) {
        let profile = std::env::var("USERPROFILE")
            .context("USERPROFILE is not set; cannot resolve Windows home directory")?;
        return Ok(PathBuf::from(profile));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve home directory")?;
    Ok(PathBuf::from(home))
}
