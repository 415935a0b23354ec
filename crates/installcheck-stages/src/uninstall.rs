use anyhow::Result;
use installcheck_core::{HarnessContext, Stage, StageVerdict};
use installcheck_snapshot::path_exists;

use crate::external::{run_external, ExternalRun};

/// Answer fed to the uninstaller's confirmation prompt.
const CONFIRMATION: &[u8] = b"y\n";

/// Runs the uninstaller, confirms its prompt, and asserts that both the
/// installation root and the entry point are gone.
pub struct UninstallStage;

impl Stage for UninstallStage {
    fn name(&self) -> &str {
        "Uninstallation"
    }

    fn mutates_install(&self) -> bool {
        true
    }

    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict> {
        let mut verdict = StageVerdict::new();
        let run = ExternalRun {
            label: "Uninstallation",
            spec: &ctx.config.uninstaller,
            extra_args: &[],
            stdin: Some(CONFIRMATION),
            timeout: ctx.config.uninstall_timeout(),
            log_name: "uninstall.log",
        };
        if !run_external(ctx, &run, &mut verdict)? {
            return Ok(verdict);
        }

        let layout = &ctx.layout;
        verdict.check(
            !path_exists(layout.install_root()),
            "Installation directory removed",
            format!(
                "Installation directory still exists at {}",
                layout.install_root().display()
            ),
        );
        verdict.check(
            !path_exists(layout.entry_point()),
            "Executable removed",
            format!("Executable still exists at {}", layout.entry_point().display()),
        );
        Ok(verdict)
    }
}
