//! Fixtures for running the lifecycle stages against a throwaway product.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use installcheck_core::{
    CommandSpec, HarnessConfig, HarnessContext, RunOptions, RuntimeConfig, SmokeConfig, Stage,
};

use crate::FreshInstallStage;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `config.json` body carrying every key the install stage requires.
pub const COMPLETE_CONFIG: &str = r#"{"version": "1.0.0", "python_version": "3.11"}"#;

/// Fresh directory under the system temp dir, unique per process and call.
pub fn test_root(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "installcheck-{label}-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

pub fn write_executable(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create script parent");
    }
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("must write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .expect("must mark script executable");
    }
}

/// A throwaway product checkout plus a fake home directory. Installer,
/// uninstaller and interpreter are shell scripts so every stage can run for
/// real without Python.
pub struct Product {
    pub root: PathBuf,
    pub workdir: PathBuf,
    pub home: PathBuf,
    pub install_root: PathBuf,
    pub entry_point: PathBuf,
}

impl Product {
    pub fn new() -> Self {
        let root = test_root("product");
        let workdir = root.join("product");
        fs::create_dir_all(&workdir).expect("must create product dir");
        for artifact in ["install.py", "uninstall.py", "pyproject.toml"] {
            fs::write(workdir.join(artifact), "").expect("must write artifact");
        }
        let home = root.join("home");
        let product = Self {
            install_root: home.join(".ufps"),
            entry_point: home.join(".local").join("bin").join("ufps"),
            home,
            workdir,
            root,
        };
        product.set_runtime_banner("Python 3.11.4");
        product.set_installer(&product.installer_body(COMPLETE_CONFIG, 3));
        product.set_uninstaller(&product.uninstaller_body());
        product
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.root.join("scripts").join(name)
    }

    pub fn set_runtime_banner(&self, banner: &str) {
        write_executable(&self.script("python"), &format!("echo \"{banner}\"\n"));
    }

    pub fn set_installer(&self, body: &str) {
        write_executable(&self.script("install.sh"), body);
    }

    pub fn set_uninstaller(&self, body: &str) {
        write_executable(&self.script("uninstall.sh"), body);
    }

    pub fn set_entry_point(&self, body: &str) {
        write_executable(&self.entry_point, body);
    }

    pub fn installer_args_file(&self) -> PathBuf {
        self.root.join("installer-args")
    }

    /// Installer script that lays out the full installation with `models`
    /// model files and `config_json` as the saved configuration.
    pub fn installer_body(&self, config_json: &str, models: usize) -> String {
        format!(
            r##"set -e
ROOT="{root}"
ENTRY="{entry}"
echo "$*" > "{args}"
mkdir -p "$ROOT/venv/bin" "$ROOT/RIFE/model" "$ROOT/models" "$(dirname "$ENTRY")"
printf '#!/bin/sh\nexit 0\n' > "$ROOT/venv/bin/python"
chmod +x "$ROOT/venv/bin/python"
echo "print('ufps')" > "$ROOT/cli.py"
echo '{config_json}' > "$ROOT/config.json"
touch "$ROOT/RIFE/inference_video.py" "$ROOT/RIFE/inference_img.py"
i=0
while [ "$i" -lt {models} ]; do
  head -c 2048 /dev/zero > "$ROOT/models/flownet$i.pkl"
  i=$((i + 1))
done
printf '#!/bin/sh\necho "UFPS - Ultra FPS"\n' > "$ENTRY"
chmod +x "$ENTRY"
echo "installed"
"##,
            root = self.install_root.display(),
            entry = self.entry_point.display(),
            args = self.installer_args_file().display(),
        )
    }

    pub fn uninstaller_body(&self) -> String {
        format!(
            "read answer\n[ \"$answer\" = \"y\" ] || exit 1\nrm -rf \"{}\" \"{}\"\n",
            self.install_root.display(),
            self.entry_point.display()
        )
    }

    pub fn config(&self) -> HarnessConfig {
        HarnessConfig {
            install_root: self.install_root.clone(),
            entry_point: self.entry_point.clone(),
            workdir: self.workdir.clone(),
            log_dir: self.root.join("logs"),
            runtime: RuntimeConfig {
                program: self.script("python").display().to_string(),
                min_version: "3.8".to_string(),
            },
            dependency_manager: "sh".to_string(),
            installer: CommandSpec {
                program: "/bin/sh".to_string(),
                args: vec![self.script("install.sh").display().to_string()],
            },
            uninstaller: CommandSpec {
                program: "/bin/sh".to_string(),
                args: vec![self.script("uninstall.sh").display().to_string()],
            },
            smoke: SmokeConfig {
                timeout_secs: 5,
                ..SmokeConfig::default()
            },
            ..HarnessConfig::default()
        }
    }

    pub fn context_with(&self, config: HarnessConfig, options: RunOptions) -> HarnessContext {
        HarnessContext::new(config, options, &self.home)
            .with_scratch_dir(self.root.join("scratch"))
    }

    pub fn context(&self, options: RunOptions) -> HarnessContext {
        self.context_with(self.config(), options)
    }

    /// Runs the fresh install stage so later stages start from a real layout.
    pub fn install(&self) {
        let ctx = self.context(RunOptions::default());
        let verdict = FreshInstallStage.run(&ctx).expect("fresh install must run");
        assert!(verdict.passed(), "fixture install failed: {verdict:?}");
    }
}

impl Default for Product {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Product {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}
