//! Process exit codes for `installcheck`.

/// Every executed stage passed.
pub const PASSED: i32 = 0;
/// At least one stage failed; the failed stages are printed.
pub const STAGE_FAILED: i32 = 1;
/// The harness itself broke, e.g. the existing installation could not be
/// moved aside.
pub const HARNESS_FAULT: i32 = 2;
/// Terminated by SIGINT or SIGTERM after cleanup ran.
pub const INTERRUPTED: i32 = 130;
