use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Result of one bounded wait on the attached child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildWait {
    Exited(ExitStatus),
    Running,
    /// Nothing is attached any more: cleanup stopped the child.
    Stopped,
}

#[derive(Debug, Default)]
struct ChildSlot {
    child: Option<Child>,
    closed: bool,
}

/// The external process a stage is currently waiting on, shared with the
/// cleanup path. Once `terminate` has run, no further child can be attached.
#[derive(Debug, Clone, Default)]
pub struct ActiveChild {
    slot: Arc<Mutex<ChildSlot>>,
}

impl ActiveChild {
    /// Registers `child` as the running process. After `terminate` the child
    /// is killed on the spot and an `Interrupted` error is returned.
    pub fn attach(&self, mut child: Child) -> io::Result<()> {
        let mut slot = self.lock();
        if slot.closed {
            stop_child(&mut child);
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "cleanup already ran; external process stopped",
            ));
        }
        slot.child = Some(child);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Waits at most `slice` for the attached child. The lock is held only
    /// for the slice, so `terminate` can step in between slices.
    pub fn wait_slice(&self, slice: Duration) -> io::Result<ChildWait> {
        let mut slot = self.lock();
        let Some(child) = slot.child.as_mut() else {
            return Ok(ChildWait::Stopped);
        };
        match child.wait_timeout(slice)? {
            Some(status) => {
                slot.child = None;
                Ok(ChildWait::Exited(status))
            }
            None => Ok(ChildWait::Running),
        }
    }

    /// Kills and reaps the attached child, if any.
    pub fn kill(&self) -> io::Result<()> {
        let mut slot = self.lock();
        if let Some(mut child) = slot.child.take() {
            child.kill()?;
            child.wait()?;
        }
        Ok(())
    }

    /// Closes the handle and stops whatever is attached. Returns `true` when
    /// a running child had to be stopped.
    pub fn terminate(&self) -> bool {
        let mut slot = self.lock();
        slot.closed = true;
        match slot.child.take() {
            Some(mut child) => {
                stop_child(&mut child);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChildSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stop_child(child: &mut Child) {
    let pid = child.id();
    if let Err(err) = child.kill() {
        warn!(pid, error = %err, "failed to kill external process");
    }
    match child.wait() {
        Ok(status) => debug!(pid, status = %status, "external process stopped"),
        Err(err) => warn!(pid, error = %err, "failed to reap external process"),
    }
}
