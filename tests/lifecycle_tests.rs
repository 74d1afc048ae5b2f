//! Lifecycle behavior exercised through real processes: foreground mode,
//! detach-and-run, stale PID file takeover, error logging from the main
//! loop, and external stop through the PID file.

use anyhow::anyhow;
use daemonix::{process_alive, Daemon, DaemonConfig, DaemonControl, DaemonTask, PidFile};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

static FORK_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> std::sync::MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn wait_until<F: FnMut() -> bool>(what: &str, mut done: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(25));
    }
}

/// Writes a marker file on its single foreground tick.
struct MarkerTask {
    marker: PathBuf,
}

impl DaemonTask for MarkerTask {
    fn tick(&mut self, _ctl: &mut DaemonControl) -> anyhow::Result<()> {
        fs::write(&self.marker, "ticked")?;
        Ok(())
    }

    fn after_stop(&mut self, _ctl: &mut DaemonControl) {
        let _ = fs::write(self.marker.with_extension("stopped"), "stopped");
    }
}

/// Fails every tick; the daemon must log and keep looping.
struct FailingTask;

impl DaemonTask for FailingTask {
    fn tick(&mut self, _ctl: &mut DaemonControl) -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(25));
        Err(anyhow!("tick failed"))
    }
}

#[test]
fn test_foreground_mode_single_tick_then_exit() {
    let _guard = lock();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let config = DaemonConfig::new(dir.path())
                .with_name("fg")
                .with_daemonize(false)
                .with_exit_status(7);
            let task = MarkerTask {
                marker: marker.clone(),
            };
            let mut daemon = Daemon::new(task, config).unwrap();
            let _ = daemon.start(); // never returns on success
            process::exit(99);
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert!(matches!(status, WaitStatus::Exited(_, 7)), "{status:?}");

            // exactly one tick ran, then the after-stop hook
            assert_eq!(fs::read_to_string(&marker).unwrap(), "ticked");
            assert!(marker.with_extension("stopped").exists());

            // foreground mode claims no PID file
            assert!(!dir.path().join("fg.pid").exists());
        }
    }
}

#[test]
fn test_foreground_tick_error_is_logged() {
    let _guard = lock();
    let dir = tempfile::tempdir().unwrap();

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let config = DaemonConfig::new(dir.path())
                .with_name("fg-err")
                .with_daemonize(false)
                .with_exit_status(7);
            let mut daemon = Daemon::new(FailingTask, config).unwrap();
            let _ = daemon.start();
            process::exit(99);
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert!(matches!(status, WaitStatus::Exited(_, 7)), "{status:?}");

            let log = fs::read_to_string(dir.path().join("fg-err-error.log")).unwrap();
            assert!(log.contains("tick failed"));
        }
    }
}

#[test]
fn test_daemonize_takes_over_stale_pid_and_stops_cleanly() {
    let _guard = lock();
    let dir = tempfile::tempdir().unwrap();
    let pid_file = PidFile::new(dir.path().join("bg.pid"));

    // a recorded pid that is certainly dead: start() must treat the daemon
    // as not active and overwrite the file
    let mut gone = process::Command::new("true").spawn().unwrap();
    let stale_pid = gone.id() as i32;
    gone.wait().unwrap();
    pid_file.write_exclusive(stale_pid).unwrap();

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            // launcher: start() forks the actual daemon and exits here
            let config = DaemonConfig::new(dir.path())
                .with_name("bg")
                .with_exit_status(3);
            let mut daemon = Daemon::new(FailingTask, config).unwrap();
            let _ = daemon.start();
            process::exit(99);
        }
        ForkResult::Parent { child } => {
            // the launcher exits with the configured status right after fork
            let status = waitpid(child, None).unwrap();
            assert!(matches!(status, WaitStatus::Exited(_, 3)), "{status:?}");

            // the detached daemon claims the PID file with its own pid
            wait_until("pid file takeover", || {
                matches!(pid_file.read(), Ok(Some(pid)) if pid != stale_pid && pid > 0)
            });
            let daemon_pid = pid_file.read().unwrap().unwrap();
            assert!(process_alive(daemon_pid));

            // tick errors are logged and the loop keeps going
            let log_path = dir.path().join("bg-error.log");
            wait_until("second logged tick error", || {
                fs::read_to_string(&log_path)
                    .map(|log| log.matches("tick failed").count() >= 2)
                    .unwrap_or(false)
            });

            // termination signal: dispatch sets the stop flag and the
            // daemon removes its PID file on the way out
            kill(Pid::from_raw(daemon_pid), Signal::SIGTERM).unwrap();
            wait_until("pid file removal", || !pid_file.exists());
        }
    }
}
