//! Bounded table of live worker subprocesses
//!
//! The parent daemon tracks each forked worker here. Slots are identified by
//! small serial numbers that are reused lowest-first once a worker exits, so
//! a pool of capacity N only ever hands out serials in `[0, N)`. Every
//! operation is non-blocking and touches in-process memory only; after a
//! fork each OS process has its own copy (a worker's pool has capacity 0).

use std::collections::HashMap;

/// Descriptor of one tracked worker subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildProcess {
    serial: u32,
    pid: i32,
}

impl ChildProcess {
    pub fn new(serial: u32, pid: i32) -> Self {
        Self { serial, pid }
    }

    /// Slot serial number, fixed for the worker's lifetime.
    pub fn serial_number(&self) -> u32 {
        self.serial
    }

    /// Worker process id.
    pub fn pid(&self) -> i32 {
        self.pid
    }
}

/// Fixed-capacity pool mapping worker pids to slot serial numbers.
#[derive(Debug)]
pub struct ProcessPool {
    /// Slot occupancy bitmap, indexed by serial number
    occupied: Vec<bool>,
    /// Tracked workers, keyed by pid
    children: HashMap<i32, ChildProcess>,
}

impl ProcessPool {
    /// Create an empty pool with `capacity` slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            occupied: vec![false; capacity as usize],
            children: HashMap::new(),
        }
    }

    /// Maximum number of simultaneously tracked workers.
    pub fn capacity(&self) -> u32 {
        self.occupied.len() as u32
    }

    /// Lowest free serial number, or `None` when the pool is full.
    ///
    /// The ascending scan makes serial reuse deterministic: a freed slot is
    /// handed out again before any higher unused number.
    pub fn next_free_serial(&self) -> Option<u32> {
        self.occupied.iter().position(|taken| !taken).map(|i| i as u32)
    }

    /// Mark `serial` occupied by `pid`. Returns false if the slot is out of
    /// range or already occupied (misuse guard); the pool is unchanged then.
    pub fn register(&mut self, serial: u32, pid: i32) -> bool {
        match self.occupied.get_mut(serial as usize) {
            Some(taken) if !*taken => {
                *taken = true;
                self.children.insert(pid, ChildProcess::new(serial, pid));
                true
            }
            _ => false,
        }
    }

    /// Free the slot held by `pid`, returning its descriptor, or `None` if
    /// the pid is not tracked.
    pub fn remove(&mut self, pid: i32) -> Option<ChildProcess> {
        let child = self.children.remove(&pid)?;
        if let Some(taken) = self.occupied.get_mut(child.serial as usize) {
            *taken = false;
        }
        Some(child)
    }

    /// Number of currently occupied slots.
    pub fn occupied_count(&self) -> u32 {
        self.children.len() as u32
    }

    /// True when no workers are tracked.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// All tracked workers; iteration order is unspecified.
    pub fn children(&self) -> impl Iterator<Item = &ChildProcess> {
        self.children.values()
    }

    /// Pids of all tracked workers, for broadcast signaling.
    pub fn pids(&self) -> Vec<i32> {
        self.children.keys().copied().collect()
    }
}
