use installcheck_core::{RunOptions, Stage};

mod components;
mod external;
mod install;
mod prerequisites;
mod process;
mod smoke;
mod uninstall;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use components::ComponentStage;
pub use install::{FreshInstallStage, ReinstallStage};
pub use prerequisites::PrerequisiteStage;
pub use process::{
    find_on_path, run_captured, run_tracked, tail_lines, write_run_log, CapturedRun,
    LOG_EXCERPT_LINES,
};
pub use smoke::{smoke_attempts, AttemptOutcome, SmokeAttempt, SmokeStage};
pub use uninstall::UninstallStage;

/// The six lifecycle stages in execution order.
pub fn full_plan() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(PrerequisiteStage),
        Box::new(FreshInstallStage),
        Box::new(ComponentStage),
        Box::new(SmokeStage),
        Box::new(ReinstallStage),
        Box::new(UninstallStage),
    ]
}

/// Prerequisites and smoke test only; neither touches the installation.
pub fn quick_plan() -> Vec<Box<dyn Stage>> {
    vec![Box::new(PrerequisiteStage), Box::new(SmokeStage)]
}

pub fn plan_for(options: &RunOptions) -> Vec<Box<dyn Stage>> {
    if options.quick {
        quick_plan()
    } else {
        full_plan()
    }
}

#[cfg(test)]
mod tests;
