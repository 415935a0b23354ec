use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use installcheck_core::{
    default_user_home, run_stages, HarnessConfig, HarnessContext, Stage, StageHooks, StageRecord,
};
use installcheck_snapshot::CleanupFinalizer;
use installcheck_stages::plan_for;
use tracing::{info, instrument};

use crate::completion::write_completions_script;
use crate::exit_codes;
use crate::matrix::run_matrix;
use crate::render::{
    format_cleanup_lines, format_report_location, format_summary_lines, TerminalRenderer,
};
use crate::{Cli, Commands, RunArgs};

pub(crate) fn run_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run_harness(&args),
        Commands::Matrix(args) => {
            let config = HarnessConfig::load(args.config.as_deref())?;
            run_matrix(&config, &args, TerminalRenderer::current())
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
            Ok(exit_codes::PASSED)
        }
    }
}

/// Loads the configuration file and applies command-line overrides on top.
pub(crate) fn load_run_config(args: &RunArgs) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = log_dir.clone();
    }
    if args.keep_test_install {
        config.keep_test_install = true;
    }
    Ok(config)
}

#[instrument(skip_all)]
fn run_harness(args: &RunArgs) -> Result<i32> {
    let renderer = TerminalRenderer::current();
    let config = load_run_config(args)?;
    let options = args.options();
    let home = default_user_home()?;
    let mut ctx = HarnessContext::new(config, options, &home);

    let finalizer = CleanupFinalizer::new(ctx.scratch_dir(), ctx.config.keep_test_install)
        .with_active_child(ctx.active_child().clone());
    let guard = finalizer.guard();
    install_interrupt_handler(&finalizer, renderer)?;

    info!(
        install_root = %ctx.layout.install_root().display(),
        entry_point = %ctx.layout.entry_point().display(),
        quick = options.quick,
        clean = options.clean,
        "starting harness run"
    );
    let plan = plan_for(&options);
    let mut hooks = RunHooks::new(renderer, &finalizer);
    let run = run_stages(&mut ctx, &plan, &mut hooks);
    hooks.stop_spinner();

    let cleanup = guard.finish();
    let passed = run.context("harness run aborted")?;

    renderer.print_section("Summary");
    renderer.print_lines(&format_summary_lines(ctx.report(), renderer.style()));
    if let Some(outcome) = &cleanup {
        renderer.print_lines(&format_cleanup_lines(outcome, renderer.style()));
    }
    if options.json {
        let path = write_json_report(&ctx)?;
        renderer.print_lines(&[format_report_location(&path, renderer.style())]);
    }

    Ok(if passed {
        exit_codes::PASSED
    } else {
        exit_codes::STAGE_FAILED
    })
}

fn install_interrupt_handler(
    finalizer: &CleanupFinalizer,
    renderer: TerminalRenderer,
) -> Result<()> {
    let finalizer = finalizer.clone();
    ctrlc::set_handler(move || {
        println!();
        renderer.print_status("warn", "Interrupted, cleaning up");
        if let Some(outcome) = finalizer.run() {
            renderer.print_lines(&format_cleanup_lines(&outcome, renderer.style()));
        }
        std::process::exit(exit_codes::INTERRUPTED);
    })
    .context("failed to install interrupt handler")
}

fn write_json_report(ctx: &HarnessContext) -> Result<PathBuf> {
    fs::create_dir_all(ctx.log_dir())
        .with_context(|| format!("failed to create log dir {}", ctx.log_dir().display()))?;
    let path = ctx.log_path("report.json");
    let json = ctx
        .report()
        .to_json()
        .context("failed to serialize report")?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Renders stage progress and moves the existing installation aside right
/// before the first stage that would overwrite it.
pub(crate) struct RunHooks<'a> {
    renderer: TerminalRenderer,
    finalizer: &'a CleanupFinalizer,
    spinner: Option<ProgressBar>,
}

impl<'a> RunHooks<'a> {
    pub(crate) fn new(renderer: TerminalRenderer, finalizer: &'a CleanupFinalizer) -> Self {
        Self {
            renderer,
            finalizer,
            spinner: None,
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl StageHooks for RunHooks<'_> {
    fn before_stage(&mut self, ctx: &HarnessContext, stage: &dyn Stage) -> Result<()> {
        self.renderer.print_section(stage.name());
        if !stage.mutates_install() {
            return Ok(());
        }

        if !ctx.options.clean && self.finalizer.take_snapshot(&ctx.layout.tracked_paths())? {
            for entry in self.finalizer.snapshot_entries() {
                if entry.existed {
                    self.renderer.print_status(
                        "info",
                        &format!(
                            "Existing {} moved aside to {}",
                            entry.original.display(),
                            entry.backup.display()
                        ),
                    );
                }
            }
        }
        self.spinner = self.renderer.start_spinner(stage.name());
        Ok(())
    }

    fn after_stage(&mut self, record: &StageRecord) {
        self.stop_spinner();
        self.renderer.print_stage(record);
    }
}
