use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use installcheck_core::RunOptions;

mod completion;
mod dispatch;
mod exit_codes;
mod logging;
mod matrix;
mod render;

#[derive(Parser, Debug)]
#[command(name = "installcheck", version)]
#[command(about = "Installation lifecycle verification harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install, verify, reinstall and uninstall the product on this machine,
    /// then put any pre-existing installation back.
    Run(RunArgs),
    /// Repeat `run` inside containers built for several runtime versions.
    Matrix(MatrixArgs),
    /// Print a shell completion script to stdout.
    Completions { shell: Shell },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct RunArgs {
    /// Show unrecognised smoke-test output and debug logging.
    #[arg(short, long)]
    verbose: bool,
    /// Delete any existing installation instead of preserving it.
    #[arg(long)]
    clean: bool,
    /// Only check prerequisites and run the smoke test.
    #[arg(long)]
    quick: bool,
    /// Pass the development flag to the installer.
    #[arg(long)]
    dev: bool,
    /// Leave the test installation in place; the original stays at its
    /// backup location.
    #[arg(long)]
    keep_test_install: bool,
    /// Harness configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Directory for installer logs and the JSON report.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Also write the report as JSON to <log-dir>/report.json.
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            verbose: self.verbose,
            clean: self.clean,
            quick: self.quick,
            dev: self.dev,
            json: self.json,
        }
    }
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct MatrixArgs {
    /// Runtime versions to test; defaults to the configured list.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    versions: Vec<String>,
    /// Harness configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Arguments forwarded to `installcheck run` inside each container.
    #[arg(last = true)]
    forward: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Run(args) if args.verbose);
    logging::init(verbose);

    let code = match dispatch::run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::HARNESS_FAULT
        }
    };
    std::process::exit(code);
}
