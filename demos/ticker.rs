//! Sample pool-forking daemon with a start/stop/restart/status CLI
//!
//! The parent keeps its worker pool topped up; each worker appends a
//! heartbeat line to `ticker.log` once a second until it is told to stop.
//!
//!     cargo run --example ticker -- start
//!     cargo run --example ticker -- status
//!     cargo run --example ticker -- stop

use anyhow::Result;
use daemonix::{Daemon, DaemonConfig, DaemonControl, DaemonTask};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::process;
use std::thread;
use std::time::Duration;

struct Ticker;

impl DaemonTask for Ticker {
    fn tick(&mut self, ctl: &mut DaemonControl) -> Result<()> {
        if ctl.role().is_parent() {
            // top up the pool; Full just means "retry next iteration"
            if ctl.pool().occupied_count() < ctl.pool_size() {
                ctl.fork_child()?;
            }
            thread::sleep(Duration::from_secs(1));
        } else {
            let log = ctl.config().runtime_dir().join("ticker.log");
            let mut file = OpenOptions::new().append(true).create(true).open(log)?;
            writeln!(
                file,
                "worker {} (pid {}) alive",
                ctl.serial_number().unwrap_or(0),
                ctl.pid()
            )?;
            thread::sleep(Duration::from_secs(1));
        }
        Ok(())
    }

    fn after_stop(&mut self, ctl: &mut DaemonControl) {
        ctl.log_error("ticker stopped");
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let runtime_dir =
        env::var("TICKER_RUNTIME_DIR").unwrap_or_else(|_| "/tmp/ticker".to_string());
    let pool_size = env::var("TICKER_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2);

    let config = DaemonConfig::new(&runtime_dir)
        .with_name("ticker")
        .with_pool_size(pool_size);
    let mut daemon = Daemon::new(Ticker, config)?;

    match args[1].as_str() {
        "start" => {
            println!("Starting ticker daemon ({} workers) in {}", pool_size, runtime_dir);
            daemon.start()?;
            Ok(())
        }
        "stop" => {
            daemon.stop()?;
            println!("Ticker daemon stopped.");
            Ok(())
        }
        "restart" => {
            println!("Restarting ticker daemon...");
            daemon.restart()?;
            Ok(())
        }
        "status" => {
            if daemon.control_mut().is_active()? {
                println!("ticker is running (pid {})", daemon.pid());
            } else {
                println!("ticker is not running");
            }
            Ok(())
        }
        "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Error: Unknown command '{}'", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Usage: ticker <command>");
    println!();
    println!("Commands:");
    println!("  start     Start the ticker daemon");
    println!("  stop      Stop the running daemon");
    println!("  restart   Stop then start the daemon");
    println!("  status    Report whether the daemon is running");
    println!();
    println!("Environment:");
    println!("  TICKER_RUNTIME_DIR   Runtime directory (default /tmp/ticker)");
    println!("  TICKER_POOL_SIZE     Worker pool size (default 2)");
}
