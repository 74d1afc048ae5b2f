//! Daemon lifecycle state machine
//!
//! `Daemon` drives the whole life of a background process: liveness check
//! against the PID file, detach from the controlling terminal, claim the PID
//! file, run the tick loop, fork workers on request, and shut down
//! cooperatively when a termination signal arrives. `DaemonControl` is the
//! per-process state threaded through all of it; after a fork each OS
//! process image owns its own copy (a worker gets a fresh zero-capacity
//! pool and its own pid, never a shared object).
//!
//! The same `Daemon` type doubles as the external controller: a separate
//! invocation constructs one over the same runtime directory and calls
//! `stop()` or `restart()`, which resolve the target through the PID file.

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::pidfile::{process_alive, PidFile};
use crate::pool::ProcessPool;
use crate::signal::SignalFlags;
use chrono::Local;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, setsid, ForkResult, Pid};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

/// Sleep between SIGTERM rounds when stopping an external pid.
pub const STOP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep between broadcast-and-reap rounds of the graceful children
/// shutdown protocol.
pub const REAP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Which side of the fork this process image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The supervising daemon process; owns the PID file and the pool.
    Parent,
    /// A forked worker; the serial number is fixed for its lifetime.
    Worker { serial: u32 },
}

impl Role {
    pub fn is_parent(&self) -> bool {
        matches!(self, Role::Parent)
    }

    /// Worker slot number, `None` for the parent.
    pub fn serial_number(&self) -> Option<u32> {
        match self {
            Role::Parent => None,
            Role::Worker { serial } => Some(*serial),
        }
    }
}

/// Result of a `fork_child` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// This process is now the freshly forked worker.
    Worker { serial: u32 },
    /// Still the parent; the new worker was registered in the pool.
    Spawned { serial: u32, pid: i32 },
    /// No worker created: capacity exhausted, or this process is not an
    /// eligible parent. Callers back off and may retry next iteration.
    Full,
}

/// The user-supplied unit of repeated work.
pub trait DaemonTask {
    /// One unit of work, invoked once per main-loop iteration. Errors are
    /// appended to the error log; they do not stop the daemon.
    fn tick(&mut self, ctl: &mut DaemonControl) -> anyhow::Result<()>;

    /// Hook run once after the main loop exits, before the process ends.
    fn after_stop(&mut self, _ctl: &mut DaemonControl) {}
}

/// Per-process lifecycle state: configuration, role, pool, signal flags and
/// the PID file handle.
#[derive(Debug)]
pub struct DaemonControl {
    config: DaemonConfig,
    role: Role,
    pool: ProcessPool,
    /// Own pid once running; the recorded target pid when this instance
    /// acts as an external controller.
    pid: i32,
    stop: bool,
    signals: SignalFlags,
    pid_file: PidFile,
}

impl DaemonControl {
    /// Validate the configuration, create the runtime directory if needed
    /// and size the pool.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        config.ensure_runtime_dir()?;
        let pid_file = PidFile::new(config.pid_file_path());
        let pool = ProcessPool::new(config.pool_size());
        Ok(Self {
            config,
            role: Role::Parent,
            pool,
            pid: 0,
            stop: false,
            signals: SignalFlags::new(),
            pid_file,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Worker slot number, `None` for the parent.
    pub fn serial_number(&self) -> Option<u32> {
        self.role.serial_number()
    }

    /// Last known pid (see the field note).
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// True once a termination signal has been dispatched.
    pub fn is_stop_process(&self) -> bool {
        self.stop
    }

    /// Worker pool capacity.
    pub fn pool_size(&self) -> u32 {
        self.pool.capacity()
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    pub fn signals(&self) -> &SignalFlags {
        &self.signals
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.config.pid_file_path()
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.config.error_log_path()
    }

    /// Is a previously started instance still alive? Resolves the pid
    /// through the PID file on first use; a recorded pid that is not a
    /// positive integer is `GetPidFile`.
    pub fn is_active(&mut self) -> Result<bool> {
        if self.pid == 0 {
            if let Some(recorded) = self.pid_file.read()? {
                if recorded <= 0 {
                    return Err(DaemonError::GetPidFile(self.pid_file.path().to_path_buf()));
                }
                self.pid = recorded;
            }
        }
        Ok(self.pid != 0 && process_alive(self.pid))
    }

    /// Stop the recorded instance: SIGTERM rounds until it is gone.
    /// `NotActive` when no live instance is found, `Stop` when the target
    /// never goes away.
    pub fn stop(&mut self) -> Result<()> {
        if self.is_active()? {
            if stop_pid(self.pid, 0) {
                return Ok(());
            }
            return Err(DaemonError::Stop(self.pid));
        }
        Err(DaemonError::NotActive(self.config.name().to_string()))
    }

    /// Fork a new worker if this is an eligible parent with a free slot.
    ///
    /// On the child side the returned outcome is `Worker`: the role flips,
    /// the pool is replaced by a zero-capacity one (workers never spawn
    /// grandchildren) and the pid is re-fetched. On the parent side the
    /// child is registered and `Spawned` is returned.
    pub fn fork_child(&mut self) -> Result<ForkOutcome> {
        if !self.config.daemonize() || !self.role.is_parent() || self.pool.capacity() == 0 {
            return Ok(ForkOutcome::Full);
        }
        let Some(serial) = self.pool.next_free_serial() else {
            return Ok(ForkOutcome::Full);
        };

        match unsafe { fork() }.map_err(DaemonError::ForkProcess)? {
            ForkResult::Child => {
                self.role = Role::Worker { serial };
                self.pool = ProcessPool::new(0);
                self.record_own_pid()?;
                Ok(ForkOutcome::Worker { serial })
            }
            ForkResult::Parent { child } => {
                let pid = child.as_raw();
                self.pool.register(serial, pid);
                Ok(ForkOutcome::Spawned { serial, pid })
            }
        }
    }

    /// Execute any deferred signal effects. Called once per loop iteration,
    /// at a point where partial work-in-progress state is safe to
    /// interrupt; signal handlers themselves only set flags.
    pub fn dispatch(&mut self) {
        if self.signals.take_child() {
            self.reap_children();
        }
        if self.signals.take_term() {
            self.stop_process();
        }
    }

    /// Drain every terminated child without blocking, freeing their pool
    /// slots. Keeps zombies from accumulating and the occupancy count
    /// accurate for future capacity checks.
    pub fn reap_children(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                    self.pool.remove(pid.as_raw());
                }
                // StillAlive: children exist but none has exited yet.
                // Err is ECHILD: nothing left to wait for.
                Ok(_) | Err(_) => break,
            }
        }
    }

    /// Graceful children shutdown: broadcast SIGTERM, sleep, reap, repeat
    /// until the pool is empty. Blocks without bound by design — the parent
    /// must not vanish while tracked workers remain.
    pub fn kill_all_children(&mut self) {
        self.kill_all_children_every(REAP_RETRY_INTERVAL);
    }

    /// Same protocol with an explicit polling interval.
    pub fn kill_all_children_every(&mut self, interval: Duration) {
        while !self.pool.is_empty() {
            for pid in self.pool.pids() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
            thread::sleep(interval);
            self.reap_children();
        }
    }

    /// Append a timestamped, pid-tagged entry to the error log.
    pub fn log_error(&self, message: &str) {
        let entry = format!(
            "{} [{}] {}\n",
            Local::now().format("[%Y-%m-%d %H:%M:%S]"),
            self.pid,
            message
        );
        if let Ok(mut file) = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.config.error_log_path())
        {
            let _ = file.write_all(entry.as_bytes());
        }
    }

    /// Deferred effect of the termination signal: the parent first walks
    /// its children down, a worker just stops.
    fn stop_process(&mut self) {
        if self.role.is_parent() {
            self.kill_all_children();
        }
        self.stop = true;
    }

    fn record_own_pid(&mut self) -> Result<()> {
        let pid = getpid().as_raw();
        if pid <= 0 {
            return Err(DaemonError::GetPid);
        }
        self.pid = pid;
        Ok(())
    }
}

/// A daemon: a task plus the lifecycle state that runs it.
pub struct Daemon<T: DaemonTask> {
    task: T,
    ctl: DaemonControl,
}

impl<T: DaemonTask> Daemon<T> {
    /// Build a daemon over `config`. An empty configured name defaults to
    /// the task's type name.
    pub fn new(task: T, mut config: DaemonConfig) -> Result<Self> {
        if config.name().is_empty() {
            config.set_name(default_task_name::<T>());
        }
        let ctl = DaemonControl::new(config)?;
        Ok(Self { task, ctl })
    }

    /// Start the daemon. On success this never returns: the calling process
    /// either exits as the launcher right after forking, or becomes the
    /// daemon and exits when its main loop ends. Errors detected before the
    /// fork (`AlreadyRun`, configuration problems) return normally; errors
    /// after the fork abort the detached process.
    pub fn start(&mut self) -> Result<()> {
        if self.ctl.is_active()? {
            return Err(DaemonError::AlreadyRun(self.ctl.config.name().to_string()));
        }

        if !self.ctl.config.daemonize() {
            // Foreground mode: one synchronous tick, then out.
            if let Err(e) = self.task.tick(&mut self.ctl) {
                self.ctl.log_error(&format!("{e:#}"));
            }
            self.task.after_stop(&mut self.ctl);
            self.end();
        }

        // Detach: the launcher exits immediately, the child carries on as
        // the new parent daemon.
        match unsafe { fork() }.map_err(DaemonError::ForkProcess)? {
            ForkResult::Parent { .. } => self.end(),
            ForkResult::Child => {}
        }

        self.ctl.record_own_pid()?;
        self.ctl.pid_file.write_exclusive(self.ctl.pid)?;

        // New session, away from the controlling terminal.
        let _ = setsid();
        if let Err(e) = self.redirect_stdio() {
            self.ctl.log_error(&format!("stdio redirect failed: {e}"));
        }

        self.ctl.signals.install()?;

        while !self.ctl.stop {
            if let Err(e) = self.task.tick(&mut self.ctl) {
                self.ctl.log_error(&format!("{e:#}"));
            }
            self.ctl.dispatch();
        }

        self.task.after_stop(&mut self.ctl);
        if self.ctl.role.is_parent() {
            self.ctl.pid_file.remove();
        }
        self.end()
    }

    /// Stop the running instance recorded in the PID file.
    pub fn stop(&mut self) -> Result<()> {
        self.ctl.stop()
    }

    /// `stop()` then `start()`. A failed stop aborts the restart.
    pub fn restart(&mut self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    pub fn control(&self) -> &DaemonControl {
        &self.ctl
    }

    pub fn control_mut(&mut self) -> &mut DaemonControl {
        &mut self.ctl
    }

    pub fn pid(&self) -> i32 {
        self.ctl.pid()
    }

    pub fn is_stop_process(&self) -> bool {
        self.ctl.is_stop_process()
    }

    pub fn pool_size(&self) -> u32 {
        self.ctl.pool_size()
    }

    pub fn serial_number(&self) -> Option<u32> {
        self.ctl.serial_number()
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.ctl.pid_file_path()
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.ctl.error_log_path()
    }

    /// Point stdin/stdout at the null device and stderr at the error log,
    /// so a detached daemon reports only through the log.
    fn redirect_stdio(&self) -> io::Result<()> {
        let null_in = File::open("/dev/null")?;
        let null_out = OpenOptions::new().append(true).open("/dev/null")?;
        let log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.ctl.config.error_log_path())?;

        nix::unistd::dup2(null_in.as_raw_fd(), 0).map_err(io::Error::from)?;
        nix::unistd::dup2(null_out.as_raw_fd(), 1).map_err(io::Error::from)?;
        nix::unistd::dup2(log.as_raw_fd(), 2).map_err(io::Error::from)?;
        Ok(())
    }

    fn end(&self) -> ! {
        process::exit(self.ctl.config.exit_status())
    }
}

/// Stop an arbitrary pid: SIGTERM, sleep `STOP_RETRY_INTERVAL`, repeat.
/// `attempts == 0` means unlimited rounds. True once the target is gone,
/// false when the attempts are exhausted with it still alive.
pub fn stop_pid(pid: i32, attempts: u32) -> bool {
    stop_pid_every(pid, attempts, STOP_RETRY_INTERVAL)
}

/// Same protocol with an explicit interval between rounds.
pub fn stop_pid_every(pid: i32, attempts: u32, interval: Duration) -> bool {
    if pid <= 0 {
        return false;
    }
    let target = Pid::from_raw(pid);
    let mut remaining = attempts;
    loop {
        // ESRCH here is the confirmation that the target is gone
        if kill(target, Signal::SIGTERM).is_err() {
            return true;
        }
        thread::sleep(interval);
        if attempts > 0 {
            remaining -= 1;
            if remaining == 0 {
                return false;
            }
        }
    }
}

fn default_task_name<T>() -> String {
    let name = std::any::type_name::<T>();
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or("daemon").to_string()
}
