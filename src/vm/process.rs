//! The persisted process record and the signals sent to the process it names.
//!
//! The hypervisor runner writes its pid as a decimal string, optionally with
//! a trailing newline. A record only counts when the pid it names still
//! answers the liveness signal.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{BltError, BltResult};

/// Location of the pid file that relocates the VM process across invocations.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    path: PathBuf,
}

impl ProcessRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the recorded pid.
    ///
    /// Fails when the file is missing or unreadable, or does not hold a
    /// positive pid.
    pub fn read(&self) -> BltResult<Pid> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| BltError::io(format!("read process record {}", self.path.display()), e))?;
        parse_pid(content.trim()).map_err(|reason| BltError::ProcessRecord {
            path: self.path.clone(),
            reason,
        })
    }

    /// The recorded pid, if it exists and the process is alive.
    pub fn live_pid(&self) -> Option<Pid> {
        match self.read() {
            Ok(pid) if is_alive(pid) => Some(pid),
            Ok(pid) => {
                debug!(pid = pid.as_raw(), path = %self.path.display(), "process record is stale");
                None
            }
            Err(e) => {
                debug!(error = %e, "no usable process record");
                None
            }
        }
    }

    pub fn write(&self, pid: u32) -> BltResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BltError::io(format!("create {}", parent.display()), e))?;
        }
        std::fs::write(&self.path, pid.to_string())
            .map_err(|e| BltError::io(format!("write process record {}", self.path.display()), e))
    }

    /// Remove the record. A missing record is not an error.
    pub fn clear(&self) -> BltResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BltError::io(
                format!("remove process record {}", self.path.display()),
                e,
            )),
        }
    }
}

fn parse_pid(raw: &str) -> Result<Pid, String> {
    let pid: i32 = raw
        .parse()
        .map_err(|e| format!("'{raw}' is not a process id: {e}"))?;
    // kill(0) and kill(-n) address process groups, never a single process.
    if pid <= 0 {
        return Err(format!("'{raw}' is not a valid process id"));
    }
    Ok(Pid::from_raw(pid))
}

/// Send the null signal to `pid`.
///
/// Returns `false` when the process does not exist or cannot be signalled.
pub fn is_alive(pid: Pid) -> bool {
    signal::kill(pid, None).is_ok()
}

/// Ask the process to shut down.
pub fn interrupt(pid: Pid) -> Result<(), Errno> {
    signal::kill(pid, Signal::SIGINT)
}

/// Terminate the process unconditionally.
pub fn force_kill(pid: Pid) -> Result<(), Errno> {
    signal::kill(pid, Signal::SIGKILL)
}
