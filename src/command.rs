//! Command-line front end for daemons.
//!
//! A [`DaemonCommand`] describes a job: its name, how it configures the
//! controller, and the hooks run around the loop. [`CommandRunner`] wires a
//! command to a [`Daemon`], applies the [`DaemonArgs`] overrides, optionally
//! holds an exclusive [`Lock`] for the duration of the run and maps the outcome
//! to a process exit status.
//!
//! ```no_run
//! use loop_daemon::command::{CommandRunner, DaemonArgs, DaemonCommand};
//! use loop_daemon::{Daemon, WorkError};
//! use std::time::Duration;
//!
//! struct Import;
//!
//! impl DaemonCommand for Import {
//!     fn name(&self) -> &str {
//!         "app:import"
//!     }
//!
//!     fn configure(&mut self, daemon: &mut Daemon) {
//!         daemon.set_loop_interval(Some(Duration::from_secs(1)));
//!     }
//!
//!     fn execute(&mut self, _daemon: &mut Daemon) -> Result<(), WorkError> {
//!         // import one batch
//!         Ok(())
//!     }
//! }
//!
//! let code = CommandRunner::new(Import).unique(true).run(&DaemonArgs::default())?;
//! std::process::exit(code);
//! # Ok::<(), loop_daemon::Error>(())
//! ```

use std::cell::RefCell;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::daemon::{Daemon, WorkError};
use crate::error::{Error, Result};
use crate::lock::{FileLock, Lock};
use crate::shutdown::ShutdownCode;

/// Options shared by every daemon command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct DaemonArgs {
    /// Set the command a time to live in seconds
    #[cfg_attr(feature = "cli", arg(long, value_name = "SECONDS"))]
    pub ttl: Option<u64>,

    /// Gracefully stop running command when given memory volume is reached, Ex: 500M
    #[cfg_attr(feature = "cli", arg(long = "memory-max", value_name = "SIZE"))]
    pub memory_max: Option<String>,

    /// Run the command one time as a classic command
    #[cfg_attr(feature = "cli", arg(long = "no-daemon"))]
    pub no_daemon: bool,
}

impl DaemonArgs {
    /// The `--ttl` override. Zero means "keep the configured value".
    #[must_use]
    pub fn ttl_override(&self) -> Option<Duration> {
        self.ttl.filter(|&secs| secs > 0).map(Duration::from_secs)
    }

    /// The `--memory-max` override. Blank or `"0"` means "keep the configured
    /// value".
    #[must_use]
    pub fn memory_override(&self) -> Option<&str> {
        self.memory_max
            .as_deref()
            .map(str::trim)
            .filter(|limit| !limit.is_empty() && *limit != "0")
    }
}

/// A job run by a [`CommandRunner`].
///
/// Only `name` and `execute` are required.
pub trait DaemonCommand {
    /// Name of the job. Also names the default exclusive lock.
    fn name(&self) -> &str;

    /// Called once when the runner is created, to set the default TTL,
    /// memory limit and interval.
    fn configure(&mut self, _daemon: &mut Daemon) {}

    /// Called before the first iteration.
    ///
    /// # Errors
    ///
    /// A failure aborts the run before any iteration.
    fn setup(&mut self) -> std::result::Result<(), WorkError> {
        Ok(())
    }

    /// One iteration of the job.
    ///
    /// # Errors
    ///
    /// A failure is passed to [`DaemonCommand::on_failure`].
    fn execute(&mut self, daemon: &mut Daemon) -> std::result::Result<(), WorkError>;

    /// Failure policy. Propagates the failure by default, which stops the run.
    ///
    /// # Errors
    ///
    /// A returned failure aborts the run.
    fn on_failure(
        &mut self,
        failure: WorkError,
        _daemon: &mut Daemon,
    ) -> std::result::Result<(), WorkError> {
        Err(failure)
    }

    /// Called after the loop stopped; the result is the exit status.
    ///
    /// Defaults to the numeric shutdown code, `0` when none was recorded.
    fn on_shutdown(&mut self, daemon: &Daemon) -> i32 {
        daemon.shutdown_code().map_or(0, ShutdownCode::as_i32)
    }
}

/// Runs a [`DaemonCommand`] on its own [`Daemon`].
pub struct CommandRunner<C> {
    command: C,
    daemon: Daemon,
    unique: bool,
    lock_name: Option<String>,
    lock: Option<Box<dyn Lock>>,
}

impl<C: DaemonCommand> CommandRunner<C> {
    /// Create a runner with a default controller and let the command
    /// configure it.
    pub fn new(command: C) -> Self {
        Self::with_daemon(command, Daemon::new())
    }

    /// Create a runner around an existing controller, e.g. one built with
    /// [`Daemon::from_config`]. The command still gets to configure it.
    pub fn with_daemon(mut command: C, mut daemon: Daemon) -> Self {
        command.configure(&mut daemon);
        Self {
            command,
            daemon,
            unique: false,
            lock_name: None,
            lock: None,
        }
    }

    /// Create a runner from a loaded configuration.
    ///
    /// The controller is built with [`Daemon::from_config`] and the
    /// configured `name` replaces the command name for the exclusive lock,
    /// so two deployments of the same command can run side by side.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `memory_max` is malformed.
    pub fn from_config(command: C, config: &Config) -> Result<Self> {
        let mut runner = Self::with_daemon(command, Daemon::from_config(config)?);
        runner.lock_name = Some(config.name.clone());
        Ok(runner)
    }

    /// Whether only one instance of the command may run at a time.
    #[must_use]
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Use `lock` instead of the default [`FileLock`] named after the command.
    /// Only used when the runner is unique.
    #[must_use]
    pub fn with_lock<L: Lock + 'static>(mut self, lock: L) -> Self {
        self.lock = Some(Box::new(lock));
        self
    }

    /// Name of the exclusive lock: the configured name when built with
    /// [`CommandRunner::from_config`], else the command name.
    #[must_use]
    pub fn lock_name(&self) -> &str {
        self.lock_name
            .as_deref()
            .unwrap_or_else(|| self.command.name())
    }

    /// Whether the runner takes the exclusive lock.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// The controller.
    #[must_use]
    pub const fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    /// The controller, mutably.
    pub fn daemon_mut(&mut self) -> &mut Daemon {
        &mut self.daemon
    }

    /// The command.
    #[must_use]
    pub const fn command(&self) -> &C {
        &self.command
    }

    /// The command, mutably.
    pub fn command_mut(&mut self) -> &mut C {
        &mut self.command
    }

    /// Run the command and return its exit status.
    ///
    /// When the runner is unique the lock is taken first and released once at
    /// the end, also when the run fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] when the lock is held elsewhere, a
    /// configuration error for a malformed `--memory-max`, and any failure
    /// the command did not absorb.
    pub fn run(&mut self, args: &DaemonArgs) -> Result<i32> {
        let name = self.command.name().to_owned();

        if self.unique {
            let lock_name = self.lock_name().to_owned();
            let lock = self
                .lock
                .get_or_insert_with(|| Box::new(FileLock::for_job(&lock_name)));
            if !lock.acquire()? {
                warn!(command = %name, lock = %lock_name, "Command is already running");
                return Err(Error::already_running(lock_name));
            }
        }

        let result = self.dispatch(&name, args);

        if !self.unique {
            return result;
        }

        let released = self
            .lock
            .as_mut()
            .map_or(Ok(()), |lock| lock.release());

        match result {
            Ok(code) => released.map(|()| code),
            Err(e) => {
                if let Err(release_err) = released {
                    warn!(command = %name, error = %release_err, "Failed to release lock after failed run");
                }
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, name: &str, args: &DaemonArgs) -> Result<i32> {
        if args.no_daemon {
            info!(command = %name, "Running command once");
            self.command.setup().map_err(Error::work)?;

            if let Err(failure) = self.command.execute(&mut self.daemon) {
                self.command
                    .on_failure(failure, &mut self.daemon)
                    .map_err(Error::work)?;
            }

            return Ok(self.command.on_shutdown(&self.daemon));
        }

        if let Some(ttl) = args.ttl_override() {
            self.daemon.set_ttl(Some(ttl));
        }
        if let Some(limit) = args.memory_override() {
            self.daemon.set_memory_limit(limit)?;
        }

        info!(command = %name, unique = self.unique, "Running command as daemon");
        self.command.setup().map_err(Error::work)?;

        {
            // work and failure handler both need the command
            let command = RefCell::new(&mut self.command);
            let mut work = |daemon: &mut Daemon| command.borrow_mut().execute(daemon);
            let mut on_failure = |failure: WorkError, daemon: &mut Daemon| {
                command.borrow_mut().on_failure(failure, daemon)
            };
            self.daemon.run_with(&mut work, Some(&mut on_failure))?;
        }

        let code = self.command.on_shutdown(&self.daemon);
        info!(command = %name, exit_code = code, "Command stopped");
        Ok(code)
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for CommandRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("command", &self.command)
            .field("daemon", &self.daemon)
            .field("unique", &self.unique)
            .field("lock_name", &self.lock_name)
            .field("has_lock", &self.lock.is_some())
            .finish()
    }
}
