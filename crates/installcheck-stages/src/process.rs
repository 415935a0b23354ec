//! Child-process execution with bounded waits and captured output.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use installcheck_core::{ActiveChild, ChildWait};
use tracing::{debug, instrument, warn};

/// Lines of a captured log surfaced in the report when a stage fails.
pub const LOG_EXCERPT_LINES: usize = 40;

const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct CapturedRun {
    /// `None` when the child was killed at the deadline or by cleanup.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedRun {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|status| status.success())
    }

    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }

    pub fn describe_exit(&self) -> String {
        match self.status {
            None => "timed out".to_string(),
            Some(status) => match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            },
        }
    }
}

/// Runs `cmd` untracked; see [`run_tracked`].
pub fn run_captured(cmd: Command, stdin: Option<&[u8]>, timeout: Duration) -> Result<CapturedRun> {
    run_tracked(cmd, stdin, timeout, &ActiveChild::default())
}

/// Spawns `cmd`, feeds `stdin` (or `/dev/null`), and waits at most `timeout`.
/// The child is attached to `active` while it runs so cleanup can stop it.
/// A child killed at the deadline or stopped by cleanup is reported with
/// `status == None`. Only a spawn, pipe or wait failure is an `Err`.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_tracked(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    active: &ActiveChild,
) -> Result<CapturedRun> {
    if active.is_closed() {
        bail!("cleanup already ran; not launching {:?}", cmd.get_program());
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to launch {:?}", cmd.get_program()))?;

    let child_stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    active
        .attach(child)
        .context("external process stopped by cleanup")?;

    if let (Some(input), Some(mut child_stdin)) = (stdin, child_stdin) {
        match child_stdin.write_all(input) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!("child closed stdin before reading input");
            }
            Err(err) => {
                if let Err(kill_err) = active.kill() {
                    warn!(error = %kill_err, "failed to kill child after stdin error");
                }
                return Err(err).context("failed to write child stdin");
            }
        }
    }

    let stdout_rx = spawn_reader(stdout);
    let stderr_rx = spawn_reader(stderr);

    let status = wait_until(active, Instant::now() + timeout, timeout)?;

    let stdout = collect_output(&stdout_rx).context("failed collecting stdout")?;
    let stderr = collect_output(&stderr_rx).context("failed collecting stderr")?;
    debug!(exit_code = ?status.and_then(|status| status.code()), "child process finished");

    Ok(CapturedRun {
        status,
        stdout,
        stderr,
    })
}

fn wait_until(
    active: &ActiveChild,
    deadline: Instant,
    timeout: Duration,
) -> Result<Option<ExitStatus>> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(timeout_secs = timeout.as_secs(), "child process timed out, killing");
            active.kill().context("failed to kill timed out child")?;
            return Ok(None);
        }
        match active
            .wait_slice(remaining.min(WAIT_SLICE))
            .context("failed waiting for child process")?
        {
            ChildWait::Exited(status) => return Ok(Some(status)),
            ChildWait::Running => {}
            ChildWait::Stopped => {
                warn!("child process stopped by cleanup");
                return Ok(None);
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = reader
            .read_to_end(&mut buf)
            .map(|_| String::from_utf8_lossy(&buf).into_owned());
        let _ = tx.send(result);
    });
    rx
}

/// A grandchild that inherited the pipe can keep it open after the direct
/// child exits or is killed; its output is abandoned after a grace period.
fn collect_output(rx: &mpsc::Receiver<io::Result<String>>) -> Result<String> {
    match rx.recv_timeout(OUTPUT_DRAIN_GRACE) {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("output pipe still held open by a descendant process; abandoning it");
            Ok(String::new())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(anyhow!("output reader thread panicked"))
        }
    }
}

/// Writes the captured streams of `run` to `path`, creating the parent
/// directory.
pub fn write_run_log(path: &Path, command: &str, run: &CapturedRun) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log dir {}", parent.display()))?;
    }
    let body = format!(
        "$ {command}\n[{}]\n=== stdout ===\n{}\n=== stderr ===\n{}\n",
        run.describe_exit(),
        run.stdout,
        run.stderr
    );
    fs::write(path, body).with_context(|| format!("failed to write log {}", path.display()))
}

/// Last `max_lines` lines of `text`.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Looks `program` up on `path_var` the way a shell would. Names containing a
/// path separator are checked directly.
pub fn find_on_path(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .flat_map(|dir| executable_names(program).map(move |name| dir.join(name)))
        .find(|path| is_executable(path))
}

fn executable_names(program: &str) -> impl Iterator<Item = String> + '_ {
    let suffixes: &[&str] = if cfg!(windows) {
        &["", ".exe", ".cmd", ".bat"]
    } else {
        &[""]
    };
    suffixes.iter().map(move |suffix| format!("{program}{suffix}"))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
