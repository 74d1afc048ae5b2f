//! Typed failure kinds for daemon lifecycle operations
//!
//! Configuration and startup failures abort the corresponding call before any
//! fork. Once the main loop is running, only task errors are caught (and
//! logged); everything here is fatal to the operation that raised it.

use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by daemon construction, startup, and external control.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Unknown or unparseable configuration option at construction.
    #[error("option `{0}` is invalid")]
    InvalidOption(String),

    /// `start()` attempted while a live instance holds the PID file.
    #[error("daemon `{0}` already run")]
    AlreadyRun(String),

    /// `stop()` attempted with no live instance found.
    #[error("daemon `{0}` not active")]
    NotActive(String),

    /// The OS refused to create a new process.
    #[error("failure fork process: {0}")]
    ForkProcess(Errno),

    /// Own process id unobtainable after forking.
    #[error("failure get pid")]
    GetPid,

    /// PID file exists but a usable pid could not be read from it.
    #[error("failure get pid from file {0}")]
    GetPidFile(PathBuf),

    /// PID file could not be opened for writing.
    #[error("failure open pid file {path}: {source}")]
    OpenPidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// PID file write did not complete under the exclusive lock.
    #[error("failure write pid to file {0}")]
    WritePidFile(PathBuf),

    /// External stop protocol exhausted its attempts with the target alive.
    #[error("failure stop, pid: {0}")]
    Stop(i32),

    /// Signal handler registration failed.
    #[error("failure install signal handlers: {0}")]
    InstallSignals(#[source] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DaemonError>;
