//! Daemon configuration
//!
//! Immutable after the daemon is constructed. The only required setting is
//! the runtime directory; everything else has a default. Options can also be
//! applied from string key/value pairs (e.g. a parsed config file section),
//! where an unknown key or unparseable value is rejected up front.

use crate::error::{DaemonError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Default permissions for a runtime directory created by the daemon.
pub const DEFAULT_DIR_PERMISSIONS: u32 = 0o775;

/// Daemon settings consumed by the lifecycle state machine.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the PID file and error log
    runtime_dir: PathBuf,
    /// Display name; used to derive file names. Empty means "derive from
    /// the task type name" at daemon construction.
    name: String,
    /// Detach and run in the background (false = one synchronous tick)
    daemonize: bool,
    /// Mode applied when the runtime directory has to be created
    dir_permissions: u32,
    /// Max number of worker subprocesses (0 = no workers)
    pool_size: u32,
    /// Process exit status on clean shutdown
    exit_status: i32,
}

impl DaemonConfig {
    /// Create a configuration with the required runtime directory and
    /// defaults for everything else.
    pub fn new<P: AsRef<Path>>(runtime_dir: P) -> Self {
        let dir = runtime_dir.as_ref().to_string_lossy();
        Self {
            runtime_dir: PathBuf::from(dir.trim_end_matches('/')),
            name: String::new(),
            daemonize: true,
            dir_permissions: DEFAULT_DIR_PERMISSIONS,
            pool_size: 0,
            exit_status: 0,
        }
    }

    /// Build a configuration from string key/value options.
    ///
    /// Recognized keys: `runtime_dir`, `name`, `daemonize`,
    /// `dir_permissions` (octal), `pool_size`, `exit_status`.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::new("");
        for (key, value) in options {
            config.apply_option(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply a single string option. Unknown keys and unparseable values
    /// are both `InvalidOption`.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || DaemonError::InvalidOption(key.to_string());
        match key {
            "runtime_dir" => {
                self.runtime_dir = PathBuf::from(value.trim_end_matches('/'));
            }
            "name" => self.name = value.to_string(),
            "daemonize" => {
                self.daemonize = match value {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(invalid()),
                };
            }
            "dir_permissions" => {
                self.dir_permissions =
                    u32::from_str_radix(value.trim_start_matches("0o"), 8).map_err(|_| invalid())?;
            }
            "pool_size" => self.pool_size = value.parse().map_err(|_| invalid())?,
            "exit_status" => self.exit_status = value.parse().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        }
        Ok(())
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable detaching (disabled = foreground single tick).
    pub fn with_daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }

    /// Set the permissions used when creating the runtime directory.
    pub fn with_dir_permissions(mut self, mode: u32) -> Self {
        self.dir_permissions = mode;
        self
    }

    /// Set the worker pool capacity.
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the exit status used on clean shutdown.
    pub fn with_exit_status(mut self, status: i32) -> Self {
        self.exit_status = status;
        self
    }

    /// Reject configurations missing required settings.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_dir.as_os_str().is_empty() {
            return Err(DaemonError::InvalidOption("runtime_dir".to_string()));
        }
        Ok(())
    }

    /// Create the runtime directory if missing, forcing the configured
    /// permissions on it.
    pub fn ensure_runtime_dir(&self) -> Result<()> {
        self.validate()?;
        if !self.runtime_dir.exists() {
            let invalid = || DaemonError::InvalidOption("runtime_dir".to_string());
            fs::create_dir_all(&self.runtime_dir).map_err(|_| invalid())?;
            // set_permissions is not subject to the process umask
            fs::set_permissions(&self.runtime_dir, fs::Permissions::from_mode(self.dir_permissions))
                .map_err(|_| invalid())?;
        }
        Ok(())
    }

    /// Path of the PID file: `<runtime_dir>/<name>.pid`.
    pub fn pid_file_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.pid", self.name))
    }

    /// Path of the append-only error log: `<runtime_dir>/<name>-error.log`.
    pub fn error_log_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}-error.log", self.name))
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn daemonize(&self) -> bool {
        self.daemonize
    }

    pub fn dir_permissions(&self) -> u32 {
        self.dir_permissions
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }
}
