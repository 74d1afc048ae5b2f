//! Deferred-safe signal flags
//!
//! Raw signal delivery must do only minimal, reentrancy-safe work. The
//! handlers registered here set one atomic flag each and nothing else; the
//! substantive state transitions (reaping children, the graceful shutdown
//! protocol) run later from the daemon's explicit `dispatch()` step at a
//! loop-iteration boundary.
//!
//! Registrations survive `fork()`; the flag state itself is per-process
//! after copy-on-write, so a worker observes only signals delivered to it.

use crate::error::{DaemonError, Result};
use signal_hook::consts::{SIGCHLD, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pending-signal flags for the termination and child-status signals.
#[derive(Debug, Clone)]
pub struct SignalFlags {
    term: Arc<AtomicBool>,
    child: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Create cleared flags. No handlers are registered until `install()`.
    pub fn new() -> Self {
        Self {
            term: Arc::new(AtomicBool::new(false)),
            child: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register flag-setting handlers for SIGTERM and SIGCHLD.
    pub fn install(&self) -> Result<()> {
        flag::register(SIGTERM, Arc::clone(&self.term)).map_err(DaemonError::InstallSignals)?;
        flag::register(SIGCHLD, Arc::clone(&self.child)).map_err(DaemonError::InstallSignals)?;
        Ok(())
    }

    /// Consume a pending termination signal, clearing the flag.
    pub fn take_term(&self) -> bool {
        self.term.swap(false, Ordering::SeqCst)
    }

    /// Consume a pending child-status-change signal, clearing the flag.
    pub fn take_child(&self) -> bool {
        self.child.swap(false, Ordering::SeqCst)
    }

    /// True while a termination signal is pending (flag not consumed).
    pub fn term_pending(&self) -> bool {
        self.term.load(Ordering::SeqCst)
    }

    /// True while a child-status-change signal is pending.
    pub fn child_pending(&self) -> bool {
        self.child.load(Ordering::SeqCst)
    }

    /// Mark a termination signal pending, as the handler would.
    pub fn raise_term(&self) {
        self.term.store(true, Ordering::SeqCst);
    }

    /// Mark a child-status-change signal pending, as the handler would.
    pub fn raise_child(&self) {
        self.child.store(true, Ordering::SeqCst);
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}
