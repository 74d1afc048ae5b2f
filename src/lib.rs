//! Fork-based daemon supervision for Unix
//!
//! Turn a repeated unit of work into a detached background process with a
//! PID file, a bounded pool of forked workers, and signal-driven graceful
//! shutdown. A separate invocation over the same runtime directory acts as
//! the external controller (`stop`, `restart`, status via the PID file).

pub mod config;
pub mod daemon;
pub mod error;
pub mod pidfile;
pub mod pool;
pub mod signal;

pub use config::DaemonConfig;
pub use daemon::{
    stop_pid, stop_pid_every, Daemon, DaemonControl, DaemonTask, ForkOutcome, Role,
    REAP_RETRY_INTERVAL, STOP_RETRY_INTERVAL,
};
pub use error::{DaemonError, Result};
pub use pidfile::{process_alive, PidFile};
pub use pool::{ChildProcess, ProcessPool};
pub use signal::SignalFlags;
