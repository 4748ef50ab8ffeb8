#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//! # loop-daemon: Run-Loop Controller for Long-Running Jobs
//!
//! Turns a unit of work into a supervised loop that knows when to stop.
//! Before every iteration the controller checks its shutdown triggers and
//! records why it stopped, so a process supervisor can restart the job with a
//! meaningful exit status.
//!
//! ## Key Features
//!
//! - **Time to live**: stop after a configured duration
//! - **Memory threshold**: stop once resident memory goes over a limit such
//!   as `"550M"`
//! - **Signal Handling**: `SIGTERM`/`SIGINT` stop the loop between
//!   iterations, never in the middle of one
//! - **Programmatic shutdown**: work can stop the loop with its own code
//! - **Failure policy**: failures abort the run unless a handler absorbs them
//! - **Command layer**: `--ttl`, `--memory-max`, `--no-daemon` and an
//!   optional exclusive lock per job
//! - **Configuration**: `daemon.toml` plus `DAEMON_` environment variables
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loop_daemon::{Daemon, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let mut daemon = Daemon::builder()
//!         .ttl(Duration::from_secs(3600))
//!         .memory_limit("550M")?
//!         .loop_interval(Duration::from_millis(500))
//!         .callback(|_daemon| {
//!             tracing::info!("Working...");
//!             Ok(())
//!         })
//!         .build();
//!
//!     daemon.run()?;
//!     std::process::exit(daemon.shutdown_code().map_or(0, i32::from));
//! }
//! ```

mod config;
mod daemon;
mod error;

pub mod command;
pub mod lock;
pub mod logging;
pub mod resources;
pub mod shutdown;
pub mod signal;
pub mod size;

// Public exports
pub use config::{Config, ConfigBuilder, LogConfig, LogLevel};
pub use daemon::{Daemon, DaemonBuilder, DaemonStats, FailureHandler, Work, WorkError};
pub use error::{Error, ErrorCode, Result};
pub use shutdown::ShutdownCode;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "daemon.toml";
