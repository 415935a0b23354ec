mod child;
mod config;
mod context;
mod layout;
mod report;
mod sequencer;

pub use child::{ActiveChild, ChildWait};
pub use config::{
    expand_home, parse_config, parse_runtime_version, CommandSpec, HarnessConfig, MatrixConfig,
    PackageCheck, RunOptions, RuntimeConfig, SmokeConfig,
};
pub use context::HarnessContext;
pub use layout::{default_user_home, InstallLayout};
pub use report::{
    CheckLine, CheckStatus, ExecutionReport, LogExcerpt, StageRecord, StageStatus, StageVerdict,
};
pub use sequencer::{run_stages, NoHooks, Stage, StageHooks};
