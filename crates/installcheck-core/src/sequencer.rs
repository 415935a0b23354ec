use anyhow::Result;
use tracing::{debug, info, warn};

use crate::context::HarnessContext;
use crate::report::{StageRecord, StageVerdict};

/// One ordered verification step.
pub trait Stage {
    fn name(&self) -> &str;

    /// Whether running this stage can displace or overwrite an existing
    /// installation.
    fn mutates_install(&self) -> bool {
        false
    }

    /// Executes the predicate. `Err` is a harness fault inside the stage; it
    /// is recorded as a failure and never escapes the sequencer.
    fn run(&self, ctx: &HarnessContext) -> Result<StageVerdict>;
}

/// Observer invoked around every stage.
pub trait StageHooks {
    /// Runs before an executed stage. An error here aborts the run.
    fn before_stage(&mut self, _ctx: &HarnessContext, _stage: &dyn Stage) -> Result<()> {
        Ok(())
    }

    fn after_stage(&mut self, _record: &StageRecord) {}
}

pub struct NoHooks;

impl StageHooks for NoHooks {}

/// Runs `stages` in order, skipping everything after the first failure.
/// Returns overall success.
pub fn run_stages(
    ctx: &mut HarnessContext,
    stages: &[Box<dyn Stage>],
    hooks: &mut dyn StageHooks,
) -> Result<bool> {
    for stage in stages {
        let name = stage.name();
        if ctx.failed() {
            debug!(stage = name, "skipping stage after earlier failure");
            let record = StageRecord::skipped(name);
            hooks.after_stage(&record);
            ctx.record(record);
            continue;
        }

        hooks.before_stage(ctx, stage.as_ref())?;

        info!(stage = name, "running stage");
        let verdict = match stage.run(ctx) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(stage = name, error = %format!("{err:#}"), "stage raised a harness error");
                let mut verdict = StageVerdict::new();
                verdict.fail(format!("{name} aborted: {err:#}"));
                verdict
            }
        };

        let record = StageRecord::executed(name, verdict);
        hooks.after_stage(&record);
        ctx.record(record);
    }

    Ok(!ctx.failed())
}
