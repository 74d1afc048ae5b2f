//! PID file protocol and process liveness probing
//!
//! The PID file is the one resource shared across process boundaries: the
//! parent daemon writes its own pid there under an exclusive advisory lock,
//! and external controller invocations read it back to find the target of a
//! stop or restart. Reads are lock-free; a momentarily stale value is fine
//! because liveness is always re-verified with a null-signal probe.

use crate::error::{DaemonError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Accessor for a single on-disk PID record.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the recorded pid. `Ok(None)` when the file is absent; contents
    /// that do not parse as a decimal integer come back as `Some(0)`, which
    /// callers must treat as unusable.
    pub fn read(&self) -> Result<Option<i32>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().parse().unwrap_or(0))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(_) => Err(DaemonError::GetPidFile(self.path.clone())),
        }
    }

    /// Write `pid` in decimal, holding an exclusive advisory lock for the
    /// duration of the write.
    pub fn write_exclusive(&self, pid: i32) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DaemonError::OpenPidFile {
                path: self.path.clone(),
                source: e,
            })?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|_| DaemonError::WritePidFile(self.path.clone()))?;
        locked
            .write_all(pid.to_string().as_bytes())
            .map_err(|_| DaemonError::WritePidFile(self.path.clone()))?;
        let _ = locked.unlock();
        Ok(())
    }

    /// Best-effort unlink; an absent file is not an error.
    pub fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Null-signal liveness probe: true iff a process with this id currently
/// exists in the OS process table. Sends no effective signal.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM and friends mean the process exists but is not ours
        Err(_) => true,
    }
}
