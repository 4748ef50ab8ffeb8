//! Core run-loop controller.
//!
//! A [`Daemon`] repeatedly executes a unit of work and, before every
//! iteration, evaluates its shutdown triggers: pending OS signals, the time to
//! live and the resident memory threshold. Work can also stop the loop itself
//! through [`Daemon::request_shutdown`].
//!
//! ```no_run
//! use loop_daemon::{Daemon, ShutdownCode};
//! use std::time::Duration;
//!
//! let mut daemon = Daemon::new();
//! daemon
//!     .set_ttl(Some(Duration::from_secs(86_400)))
//!     .set_memory_limit("550M")?
//!     .set_loop_interval(Some(Duration::from_millis(500)));
//!
//! daemon.run_with_callback(|_daemon| {
//!     // poll a queue, process a batch...
//!     Ok(())
//! })?;
//!
//! println!("{:?}: {:?}", daemon.shutdown_code(), daemon.shutdown_reason());
//! # Ok::<(), loop_daemon::Error>(())
//! ```

use std::cell::Cell;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resources::{MemoryProbe, ProcessMemory};
use crate::shutdown::ShutdownCode;
use crate::signal::{default_signals, SignalListener};

/// Failure raised by a unit of work or a failure handler.
pub type WorkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A unit of work executed once per loop iteration.
///
/// Closures `FnMut(&mut Daemon) -> Result<(), WorkError>` implement this trait,
/// so most callers use [`Daemon::set_callback`]. Implement it on a type when
/// the work carries its own state across iterations.
pub trait Work {
    /// Execute one iteration. The controller is passed in so the work can
    /// request a shutdown.
    ///
    /// # Errors
    ///
    /// Any failure is routed to the failure handler, or aborts the loop when
    /// none is configured.
    fn execute(&mut self, daemon: &mut Daemon) -> std::result::Result<(), WorkError>;
}

impl<F> Work for F
where
    F: FnMut(&mut Daemon) -> std::result::Result<(), WorkError>,
{
    fn execute(&mut self, daemon: &mut Daemon) -> std::result::Result<(), WorkError> {
        self(daemon)
    }
}

/// Policy applied when a unit of work fails.
pub trait FailureHandler {
    /// Receives the failure of the current iteration. Returning `Ok` keeps the
    /// loop running.
    ///
    /// # Errors
    ///
    /// A returned failure is not handled again: it aborts the loop and is
    /// propagated out of `run()`.
    fn handle(&mut self, failure: WorkError, daemon: &mut Daemon)
        -> std::result::Result<(), WorkError>;
}

impl<F> FailureHandler for F
where
    F: FnMut(WorkError, &mut Daemon) -> std::result::Result<(), WorkError>,
{
    fn handle(
        &mut self,
        failure: WorkError,
        daemon: &mut Daemon,
    ) -> std::result::Result<(), WorkError> {
        self(failure, daemon)
    }
}

/// Run-loop controller.
///
/// The controller does not reset its shutdown state between runs. Call
/// [`Daemon::reset_shutdown`] (or build a new instance) before reusing it.
pub struct Daemon {
    /// Maximum lifetime of one run
    ttl: Option<Duration>,
    /// Resident memory limit in bytes
    memory_threshold: Option<u64>,
    /// Pause after each iteration
    loop_interval: Option<Duration>,
    work: Option<Box<dyn Work>>,
    failure_handler: Option<Box<dyn FailureHandler>>,
    handled_signals: Vec<i32>,
    memory_probe: Box<dyn MemoryProbe>,
    /// Set once a failed memory reading has been logged at `warn`
    memory_probe_warned: Cell<bool>,
    signal_listener: Option<SignalListener>,
    started_at: Option<Instant>,
    shutdown_requested: bool,
    shutdown_code: Option<ShutdownCode>,
    shutdown_reason: Option<String>,
    iterations: u64,
    failures: u64,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("ttl", &self.ttl)
            .field("memory_threshold", &self.memory_threshold)
            .field("loop_interval", &self.loop_interval)
            .field("has_work", &self.work.is_some())
            .field("has_failure_handler", &self.failure_handler.is_some())
            .field("handled_signals", &self.handled_signals)
            .field("started_at", &self.started_at)
            .field("shutdown_requested", &self.shutdown_requested)
            .field("shutdown_code", &self.shutdown_code)
            .field("shutdown_reason", &self.shutdown_reason)
            .finish_non_exhaustive()
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a controller with no limits, no work and the default signals.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: None,
            memory_threshold: None,
            loop_interval: None,
            work: None,
            failure_handler: None,
            handled_signals: default_signals(),
            memory_probe: Box::new(ProcessMemory::new()),
            memory_probe_warned: Cell::new(false),
            signal_listener: None,
            started_at: None,
            shutdown_requested: false,
            shutdown_code: None,
            shutdown_reason: None,
            iterations: 0,
            failures: 0,
        }
    }

    /// Create a new daemon builder.
    #[must_use]
    pub fn builder() -> DaemonBuilder {
        DaemonBuilder::new()
    }

    /// Create a controller from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `memory_max` is malformed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut daemon = Self::new();
        daemon
            .set_ttl(config.ttl())
            .set_loop_interval(config.loop_interval())
            .set_handled_signals(config.signals.clone());
        if let Some(memory_max) = &config.memory_max {
            daemon.set_memory_limit(memory_max)?;
        }
        Ok(daemon)
    }

    // ---- configuration -------------------------------------------------

    /// Set the time to live, `None` for unbounded.
    pub fn set_ttl(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.ttl = ttl;
        self
    }

    /// The configured time to live.
    #[must_use]
    pub const fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Set the memory threshold in bytes, `None` for unbounded.
    pub fn set_memory_threshold(&mut self, bytes: Option<u64>) -> &mut Self {
        self.memory_threshold = bytes;
        self
    }

    /// Set the memory threshold from a string such as `"500K"` or `"2 G"`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-format configuration error when the string cannot
    /// be parsed. The previous threshold is kept in that case.
    pub fn set_memory_limit(&mut self, limit: &str) -> Result<&mut Self> {
        let bytes = crate::size::parse_byte_size(limit)?;
        self.memory_threshold = Some(bytes);
        Ok(self)
    }

    /// The configured memory threshold in bytes.
    #[must_use]
    pub const fn memory_threshold(&self) -> Option<u64> {
        self.memory_threshold
    }

    /// Set the pause between iterations, `None` for no pause.
    pub fn set_loop_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.loop_interval = interval;
        self
    }

    /// The configured pause between iterations.
    #[must_use]
    pub const fn loop_interval(&self) -> Option<Duration> {
        self.loop_interval
    }

    /// Use a closure as the unit of work.
    pub fn set_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&mut Self) -> std::result::Result<(), WorkError> + 'static,
    {
        self.work = Some(Box::new(callback));
        self
    }

    /// Use a [`Work`] implementation as the unit of work.
    pub fn set_work<W: Work + 'static>(&mut self, work: W) -> &mut Self {
        self.work = Some(Box::new(work));
        self
    }

    /// Remove the configured unit of work.
    pub fn clear_work(&mut self) -> &mut Self {
        self.work = None;
        self
    }

    /// Whether a unit of work is configured.
    #[must_use]
    pub const fn has_work(&self) -> bool {
        self.work.is_some()
    }

    /// Use a closure as failure handler.
    pub fn set_failure_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(WorkError, &mut Self) -> std::result::Result<(), WorkError> + 'static,
    {
        self.failure_handler = Some(Box::new(callback));
        self
    }

    /// Use a [`FailureHandler`] implementation.
    pub fn set_failure_handler<H: FailureHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.failure_handler = Some(Box::new(handler));
        self
    }

    /// Remove the failure handler; work failures will abort the loop again.
    pub fn clear_failure_handler(&mut self) -> &mut Self {
        self.failure_handler = None;
        self
    }

    /// Whether a failure handler is configured.
    #[must_use]
    pub const fn has_failure_handler(&self) -> bool {
        self.failure_handler.is_some()
    }

    /// Set the signals that trigger a shutdown. Applied at the next
    /// `initialize()`.
    pub fn set_handled_signals(&mut self, signals: Vec<i32>) -> &mut Self {
        self.handled_signals = signals;
        self
    }

    /// The signals that trigger a shutdown.
    #[must_use]
    pub fn handled_signals(&self) -> &[i32] {
        &self.handled_signals
    }

    /// Replace the source of memory usage readings.
    pub fn set_memory_probe<P: MemoryProbe + 'static>(&mut self, probe: P) -> &mut Self {
        self.memory_probe = Box::new(probe);
        self.memory_probe_warned.set(false);
        self
    }

    // ---- lifecycle -----------------------------------------------------

    /// Record the start time and install handlers for the handled signals.
    ///
    /// Each call overwrites the start time and replaces the previous signal
    /// listener. `run()` calls it exactly once per invocation.
    ///
    /// # Errors
    ///
    /// Returns a signal error when a handler cannot be registered.
    pub fn initialize(&mut self) -> Result<&mut Self> {
        self.started_at = Some(Instant::now());
        // close the old listener before registering the new one
        self.signal_listener = None;
        self.signal_listener = Some(SignalListener::install(&self.handled_signals)?);
        Ok(self)
    }

    /// When `initialize()` last ran.
    #[must_use]
    pub const fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Time since `initialize()`, `None` before it.
    #[must_use]
    pub fn elapsed_time(&self) -> Option<Duration> {
        self.started_at.map(|started| started.elapsed())
    }

    /// Current memory usage as reported by the probe.
    ///
    /// # Errors
    ///
    /// Returns the probe's error when the usage cannot be read.
    pub fn memory_usage(&self) -> Result<u64> {
        self.memory_probe.resident_bytes()
    }

    /// Route a signal to the controller. Only handled signals request a
    /// shutdown; others are ignored.
    pub fn handle_signal(&mut self, signal: i32) {
        if self.handled_signals.contains(&signal) {
            self.request_shutdown_with_reason(
                ShutdownCode::SignalHandled,
                format!("Signal handled: {signal}"),
            );
        } else {
            debug!(signal, "Ignoring unhandled signal");
        }
    }

    /// Request a shutdown with the default reason for `code`.
    ///
    /// The latest request wins: a second call replaces the code and reason.
    pub fn request_shutdown(&mut self, code: ShutdownCode) -> &mut Self {
        self.record_shutdown(code, None)
    }

    /// Shorthand for `request_shutdown(ShutdownCode::Logic)`.
    pub fn request_logic_shutdown(&mut self) -> &mut Self {
        self.request_shutdown(ShutdownCode::Logic)
    }

    /// Request a shutdown with an explicit reason.
    pub fn request_shutdown_with_reason<S: Into<String>>(
        &mut self,
        code: ShutdownCode,
        reason: S,
    ) -> &mut Self {
        self.record_shutdown(code, Some(reason.into()))
    }

    fn record_shutdown(&mut self, code: ShutdownCode, reason: Option<String>) -> &mut Self {
        info!(%code, reason = ?reason, "Shutdown requested");
        self.shutdown_requested = true;
        self.shutdown_code = Some(code);
        self.shutdown_reason = reason;
        self
    }

    /// Clear the shutdown flag, code and reason so the controller can run again.
    pub fn reset_shutdown(&mut self) -> &mut Self {
        self.shutdown_requested = false;
        self.shutdown_code = None;
        self.shutdown_reason = None;
        self
    }

    /// The checkpoint evaluated before every iteration.
    ///
    /// Drains pending signals, then checks the TTL and then the memory
    /// threshold. Automatic triggers only fire while no shutdown has been
    /// requested, so the TTL wins when both limits are hit on the same tick
    /// and an earlier request keeps its code.
    pub fn is_shutdown_requested(&mut self) -> bool {
        let pending = self
            .signal_listener
            .as_mut()
            .map(SignalListener::drain)
            .unwrap_or_default();
        for signal in pending {
            self.handle_signal(signal);
        }

        if !self.shutdown_requested && self.is_ttl_reached() {
            debug!(ttl = ?self.ttl, elapsed = ?self.elapsed_time(), "TTL trigger fired");
            self.request_shutdown_with_reason(ShutdownCode::TtlReached, "TTL reached");
        }

        if !self.shutdown_requested && self.is_memory_threshold_reached() {
            debug!(threshold = ?self.memory_threshold, "Memory trigger fired");
            self.request_shutdown_with_reason(
                ShutdownCode::MemoryReached,
                "Memory threshold reached",
            );
        }

        self.shutdown_requested
    }

    /// Whether a shutdown has been requested, without evaluating triggers.
    #[must_use]
    pub const fn shutdown_pending(&self) -> bool {
        self.shutdown_requested
    }

    /// Whether the time to live has elapsed. Always false before
    /// `initialize()`.
    #[must_use]
    pub fn is_ttl_reached(&self) -> bool {
        match (self.ttl, self.elapsed_time()) {
            (Some(ttl), Some(elapsed)) => elapsed >= ttl,
            _ => false,
        }
    }

    /// Whether memory usage is strictly above the threshold.
    ///
    /// A failed reading counts as not reached. Only the first failure per
    /// probe is logged at `warn`, later ones at `debug`.
    #[must_use]
    pub fn is_memory_threshold_reached(&self) -> bool {
        let Some(threshold) = self.memory_threshold else {
            return false;
        };

        match self.memory_usage() {
            Ok(usage) => usage > threshold,
            Err(e) => {
                if self.memory_probe_warned.replace(true) {
                    debug!(error = %e, "Failed to read memory usage");
                } else {
                    warn!(
                        error = %e,
                        "Failed to read memory usage, memory threshold is not enforced"
                    );
                }
                false
            }
        }
    }

    /// The recorded shutdown code.
    #[must_use]
    pub const fn shutdown_code(&self) -> Option<ShutdownCode> {
        self.shutdown_code
    }

    /// The explicit shutdown reason, else the default text for the code.
    #[must_use]
    pub fn shutdown_reason(&self) -> Option<&str> {
        self.shutdown_reason
            .as_deref()
            .or_else(|| self.shutdown_code.and_then(ShutdownCode::default_reason))
    }

    /// Iterations executed by the last run.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Get controller statistics.
    #[must_use]
    pub fn stats(&self) -> DaemonStats {
        DaemonStats {
            uptime: self.elapsed_time(),
            iterations: self.iterations,
            failures: self.failures,
            shutdown_code: self.shutdown_code,
            shutdown_reason: self.shutdown_reason().map(str::to_owned),
        }
    }

    // ---- run loop ------------------------------------------------------

    /// Run the loop with the configured work and failure handler until a
    /// shutdown trigger fires.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no work is configured (before
    /// anything runs), a signal error when handlers cannot be installed, and
    /// the unchanged work failure when it is not absorbed by a failure
    /// handler.
    pub fn run(&mut self) -> Result<()> {
        let Some(mut work) = self.work.take() else {
            return Err(Error::missing_work());
        };

        let result = match self.failure_handler.take() {
            Some(mut handler) => {
                let handler_ref: &mut dyn FailureHandler = handler.as_mut();
                let result = self.run_with(work.as_mut(), Some(handler_ref));
                if self.failure_handler.is_none() {
                    self.failure_handler = Some(handler);
                }
                result
            }
            None => self.run_with(work.as_mut(), None),
        };

        // work may have installed a replacement while running
        if self.work.is_none() {
            self.work = Some(work);
        }
        result
    }

    /// Install `callback` as the unit of work, then [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// See [`Daemon::run`].
    pub fn run_with_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> std::result::Result<(), WorkError> + 'static,
    {
        self.set_callback(callback);
        self.run()
    }

    /// Run the loop with borrowed work and failure handler instead of the
    /// configured ones.
    ///
    /// # Errors
    ///
    /// See [`Daemon::run`].
    #[instrument(skip_all)]
    pub fn run_with(
        &mut self,
        work: &mut dyn Work,
        mut on_failure: Option<&mut dyn FailureHandler>,
    ) -> Result<()> {
        self.iterations = 0;
        self.failures = 0;
        self.initialize()?;

        info!(
            ttl = ?self.ttl,
            memory_threshold = ?self.memory_threshold,
            loop_interval = ?self.loop_interval,
            "Starting run loop"
        );

        while !self.is_shutdown_requested() {
            self.iterations += 1;

            if let Err(failure) = work.execute(self) {
                self.failures += 1;
                match on_failure.as_deref_mut() {
                    Some(handler) => {
                        warn!(error = %failure, iteration = self.iterations, "Work failed, passing to failure handler");
                        handler.handle(failure, self).map_err(Error::work)?;
                    }
                    None => {
                        debug!(error = %failure, iteration = self.iterations, "Work failed, aborting run loop");
                        return Err(Error::work(failure));
                    }
                }
            }

            if let Some(interval) = self.loop_interval {
                std::thread::sleep(interval);
            }
        }

        info!(
            code = ?self.shutdown_code,
            reason = ?self.shutdown_reason(),
            iterations = self.iterations,
            uptime = ?self.elapsed_time(),
            "Run loop stopped"
        );
        Ok(())
    }
}

/// Statistics about the controller's last run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStats {
    /// Time since the run started
    pub uptime: Option<Duration>,
    /// Iterations executed
    pub iterations: u64,
    /// Work failures observed
    pub failures: u64,
    /// Why the loop stopped
    pub shutdown_code: Option<ShutdownCode>,
    /// Human-readable stop reason
    pub shutdown_reason: Option<String>,
}

/// Builder for creating controllers with a fluent API.
#[derive(Debug, Default)]
pub struct DaemonBuilder {
    daemon: Daemon,
}

impl DaemonBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            daemon: Daemon::new(),
        }
    }

    /// Set the time to live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.daemon.set_ttl(Some(ttl));
        self
    }

    /// Set the memory threshold in bytes.
    #[must_use]
    pub fn memory_threshold(mut self, bytes: u64) -> Self {
        self.daemon.set_memory_threshold(Some(bytes));
        self
    }

    /// Set the memory threshold from a string such as `"500K"`.
    ///
    /// # Errors
    ///
    /// Will return an error if the string is not a valid size.
    pub fn memory_limit(mut self, limit: &str) -> Result<Self> {
        self.daemon.set_memory_limit(limit)?;
        Ok(self)
    }

    /// Set the pause between iterations.
    #[must_use]
    pub fn loop_interval(mut self, interval: Duration) -> Self {
        self.daemon.set_loop_interval(Some(interval));
        self
    }

    /// Set the unit of work from a closure.
    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Daemon) -> std::result::Result<(), WorkError> + 'static,
    {
        self.daemon.set_callback(callback);
        self
    }

    /// Set the unit of work.
    #[must_use]
    pub fn work<W: Work + 'static>(mut self, work: W) -> Self {
        self.daemon.set_work(work);
        self
    }

    /// Set the failure handler from a closure.
    #[must_use]
    pub fn failure_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(WorkError, &mut Daemon) -> std::result::Result<(), WorkError> + 'static,
    {
        self.daemon.set_failure_callback(callback);
        self
    }

    /// Set the failure handler.
    #[must_use]
    pub fn failure_handler<H: FailureHandler + 'static>(mut self, handler: H) -> Self {
        self.daemon.set_failure_handler(handler);
        self
    }

    /// Set the signals that trigger a shutdown.
    #[must_use]
    pub fn signals(mut self, signals: Vec<i32>) -> Self {
        self.daemon.set_handled_signals(signals);
        self
    }

    /// Replace the memory probe.
    #[must_use]
    pub fn memory_probe<P: MemoryProbe + 'static>(mut self, probe: P) -> Self {
        self.daemon.set_memory_probe(probe);
        self
    }

    /// Build the controller.
    #[must_use]
    pub fn build(self) -> Daemon {
        self.daemon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::FixedMemory;
    use crate::signal::{SIGINT, SIGTERM};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn null_daemon() -> Daemon {
        let mut daemon = Daemon::new();
        daemon.set_callback(|_| Ok(()));
        daemon
    }

    #[test]
    fn test_defaults() {
        let daemon = Daemon::new();
        assert_eq!(daemon.ttl(), None);
        assert_eq!(daemon.memory_threshold(), None);
        assert_eq!(daemon.loop_interval(), None);
        assert!(!daemon.has_work());
        assert!(!daemon.has_failure_handler());
        assert!(daemon.handled_signals().contains(&SIGTERM));
        assert!(daemon.handled_signals().contains(&SIGINT));
        assert!(daemon.started_at().is_none());
        assert!(daemon.elapsed_time().is_none());
        assert_eq!(daemon.shutdown_code(), None);
        assert_eq!(daemon.shutdown_reason(), None);
    }

    #[test]
    fn test_setters_chain() {
        let mut daemon = Daemon::new();
        daemon
            .set_ttl(Some(Duration::from_secs(12)))
            .set_loop_interval(Some(Duration::from_micros(1000)))
            .set_memory_threshold(Some(12));

        assert_eq!(daemon.ttl(), Some(Duration::from_secs(12)));
        assert_eq!(daemon.loop_interval(), Some(Duration::from_micros(1000)));
        assert_eq!(daemon.memory_threshold(), Some(12));

        daemon.set_ttl(None).set_memory_threshold(None);
        assert_eq!(daemon.ttl(), None);
        assert_eq!(daemon.memory_threshold(), None);
    }

    #[test]
    fn test_memory_limit_from_string() {
        let mut daemon = Daemon::new();
        daemon.set_memory_limit("10M").unwrap();
        assert_eq!(daemon.memory_threshold(), Some(10 * 1024 * 1024));

        let err = daemon.set_memory_limit("WHAT?").unwrap_err();
        assert!(err.is_config_error());
        // previous value kept
        assert_eq!(daemon.memory_threshold(), Some(10 * 1024 * 1024));
    }

    #[test]
    fn test_callback_and_failure_handler_presence() {
        let mut daemon = Daemon::new();
        daemon.set_callback(|_| Ok(()));
        daemon.set_failure_callback(|_, _| Ok(()));
        assert!(daemon.has_work());
        assert!(daemon.has_failure_handler());

        daemon.clear_work().clear_failure_handler();
        assert!(!daemon.has_work());
        assert!(!daemon.has_failure_handler());
    }

    #[test]
    fn test_request_shutdown_default_reason() {
        let mut daemon = Daemon::new();
        assert!(!daemon.is_shutdown_requested());

        daemon.request_shutdown(ShutdownCode::Logic);

        assert!(daemon.is_shutdown_requested());
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Logic));
        assert_eq!(daemon.shutdown_reason(), Some("Logic shutdown"));
    }

    #[test]
    fn test_request_shutdown_custom_code_and_reason() {
        let mut daemon = Daemon::new();
        daemon.request_shutdown_with_reason(ShutdownCode::Custom(42), "Custom reason text");

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Custom(42)));
        assert_eq!(daemon.shutdown_reason(), Some("Custom reason text"));
    }

    #[test]
    fn test_custom_code_without_reason() {
        let mut daemon = Daemon::new();
        daemon.request_shutdown(ShutdownCode::Custom(42));
        assert_eq!(daemon.shutdown_reason(), None);
    }

    #[test]
    fn test_request_shutdown_last_call_wins() {
        let mut daemon = Daemon::new();
        daemon.request_shutdown_with_reason(ShutdownCode::Custom(7), "first");
        daemon.request_shutdown(ShutdownCode::Logic);

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Logic));
        // the explicit reason of the first call is not carried over
        assert_eq!(daemon.shutdown_reason(), Some("Logic shutdown"));
    }

    #[test]
    fn test_handle_signal() {
        for signal in [SIGINT, SIGTERM] {
            let mut daemon = Daemon::new();
            daemon.handle_signal(signal);
            assert!(daemon.shutdown_pending());
            assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::SignalHandled));
            assert_eq!(
                daemon.shutdown_reason(),
                Some(format!("Signal handled: {signal}").as_str())
            );
        }
    }

    #[test]
    fn test_handle_unhandled_signal() {
        let mut daemon = Daemon::new();
        daemon.handle_signal(9);
        assert!(!daemon.is_shutdown_requested());
        assert_eq!(daemon.shutdown_code(), None);
    }

    #[test]
    fn test_custom_signal_set() {
        let mut daemon = Daemon::new();
        daemon.set_handled_signals(vec![SIGTERM]);
        daemon.handle_signal(SIGINT);
        assert!(!daemon.shutdown_pending());
        daemon.handle_signal(SIGTERM);
        assert!(daemon.shutdown_pending());
    }

    #[test]
    fn test_ttl_not_reached_before_initialize() {
        let mut daemon = Daemon::new();
        daemon.set_ttl(Some(Duration::ZERO));
        assert!(!daemon.is_ttl_reached());

        daemon.initialize().unwrap();
        assert!(daemon.is_ttl_reached());
    }

    #[test]
    fn test_memory_threshold_is_strict() {
        let probe = FixedMemory::new(1000);
        let mut daemon = Daemon::new();
        daemon.set_memory_probe(probe.clone());
        assert!(!daemon.is_memory_threshold_reached());

        daemon.set_memory_threshold(Some(1000));
        assert!(!daemon.is_memory_threshold_reached());

        probe.set(1001);
        assert!(daemon.is_memory_threshold_reached());
    }

    struct UnavailableMemory;

    impl MemoryProbe for UnavailableMemory {
        fn resident_bytes(&self) -> Result<u64> {
            Err(Error::io("memory usage unavailable"))
        }
    }

    #[test]
    fn test_failed_memory_reading_warns_once() {
        let mut daemon = Daemon::new();
        daemon
            .set_memory_threshold(Some(1))
            .set_memory_probe(UnavailableMemory);
        assert!(!daemon.memory_probe_warned.get());

        assert!(!daemon.is_memory_threshold_reached());
        assert!(daemon.memory_probe_warned.get());
        assert!(!daemon.is_memory_threshold_reached());
        assert!(daemon.memory_probe_warned.get());

        daemon.set_memory_probe(UnavailableMemory);
        assert!(!daemon.memory_probe_warned.get());
    }

    #[test]
    fn test_failed_memory_reading_does_not_stop_run() {
        let mut daemon = Daemon::new();
        daemon
            .set_ttl(Some(Duration::from_millis(30)))
            .set_loop_interval(Some(Duration::from_millis(10)))
            .set_memory_threshold(Some(1))
            .set_memory_probe(UnavailableMemory);

        daemon.run_with_callback(|_| Ok(())).unwrap();

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::TtlReached));
        assert!(daemon.iterations() > 1);
    }

    #[test]
    fn test_ttl_wins_over_memory_on_same_tick() {
        let mut daemon = Daemon::new();
        daemon
            .set_ttl(Some(Duration::ZERO))
            .set_memory_threshold(Some(1))
            .set_memory_probe(FixedMemory::new(2));
        daemon.initialize().unwrap();

        assert!(daemon.is_shutdown_requested());
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::TtlReached));
        assert_eq!(daemon.shutdown_reason(), Some("TTL reached"));
    }

    #[test]
    fn test_triggers_do_not_overwrite_earlier_request() {
        let mut daemon = Daemon::new();
        daemon
            .set_ttl(Some(Duration::ZERO))
            .set_memory_threshold(Some(1))
            .set_memory_probe(FixedMemory::new(2));
        daemon.initialize().unwrap();
        daemon.request_shutdown(ShutdownCode::Custom(42));

        assert!(daemon.is_shutdown_requested());
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Custom(42)));
    }

    #[test]
    fn test_initialize_sets_start_time() {
        let mut daemon = Daemon::new();
        daemon.initialize().unwrap();
        let first = daemon.started_at().unwrap();
        assert!(daemon.elapsed_time().is_some());

        daemon.initialize().unwrap();
        assert!(daemon.started_at().unwrap() >= first);
    }

    #[test]
    fn test_run_without_work() {
        let mut daemon = Daemon::new();
        let err = daemon.run().unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigMissing);
        // nothing ran
        assert!(daemon.started_at().is_none());
    }

    #[test]
    fn test_run_logic_shutdown_after_one_iteration() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);

        let mut daemon = Daemon::new();
        daemon
            .run_with_callback(move |d| {
                counter.set(counter.get() + 1);
                d.request_logic_shutdown();
                Ok(())
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(daemon.iterations(), 1);
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Logic));
    }

    #[test]
    fn test_run_with_anticipated_shutdown() {
        let mut daemon = null_daemon();
        daemon.request_shutdown(ShutdownCode::Custom(42));
        daemon
            .run_with_callback(|_| Err("Never thrown".into()))
            .unwrap();

        assert_eq!(daemon.iterations(), 0);
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Custom(42)));
    }

    #[test]
    fn test_run_failure_propagates_unchanged() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "Hello")
            }
        }
        impl std::error::Error for Boom {}

        let mut daemon = Daemon::new();
        let err = daemon
            .run_with_callback(|_| Err(Box::new(Boom) as WorkError))
            .unwrap_err();

        assert!(err.is_work_failure());
        assert_eq!(err.to_string(), "Hello");
        let failure = err.into_work_failure().unwrap();
        assert!(failure.downcast_ref::<Boom>().is_some());
        assert_eq!(daemon.iterations(), 1);
        assert!(!daemon.shutdown_pending());
    }

    #[test]
    fn test_failure_handler_sees_every_failure() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let mut count = 0;

        let mut daemon = Daemon::new();
        daemon
            .set_failure_callback(move |failure, d| {
                log.borrow_mut().push(failure.to_string());
                if log.borrow().len() == 3 {
                    d.request_shutdown(ShutdownCode::Logic);
                }
                Ok(())
            })
            .run_with_callback(move |_| {
                count += 1;
                Err(format!("failure {count}").into())
            })
            .unwrap();

        assert_eq!(
            *seen.borrow(),
            vec!["failure 1", "failure 2", "failure 3"]
        );
        assert_eq!(daemon.stats().failures, 3);
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Logic));
    }

    #[test]
    fn test_failure_in_handler_aborts() {
        let mut daemon = Daemon::new();
        daemon.set_failure_callback(|failure, _| Err(format!("rethrown: {failure}").into()));

        let err = daemon
            .run_with_callback(|_| Err("exception message".into()))
            .unwrap_err();
        assert!(err.is_work_failure());
        assert_eq!(err.to_string(), "rethrown: exception message");
    }

    #[test]
    fn test_handled_failure_still_sleeps() {
        let mut daemon = Daemon::new();
        daemon
            .set_ttl(Some(Duration::from_secs(1)))
            .set_loop_interval(Some(Duration::from_millis(600)))
            .set_failure_callback(|_, _| Ok(()));

        daemon.run_with_callback(|_| Err("Hello".into())).unwrap();

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::TtlReached));
        assert_eq!(daemon.iterations(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_uncatchable_signal_fails_run() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let mut daemon = Daemon::builder()
            .signals(vec![signal_hook::consts::SIGKILL])
            .callback(move |_| {
                seen.set(seen.get() + 1);
                Ok(())
            })
            .build();

        let err = daemon.run().unwrap_err();
        assert_eq!(err.category(), "signal");
        assert_eq!(err.code(), crate::ErrorCode::SignalRegisterFailed);
        assert_eq!(daemon.iterations(), 0);
        assert_eq!(calls.get(), 0);

        daemon.set_handled_signals(vec![SIGTERM]);
        daemon.request_logic_shutdown();
        daemon.run().unwrap();
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Logic));
    }

    #[test]
    fn test_signal_handled_during_tick() {
        let mut daemon = Daemon::new();
        daemon
            .run_with_callback(|d| {
                d.handle_signal(SIGINT);
                Ok(())
            })
            .unwrap();

        assert_eq!(daemon.iterations(), 1);
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::SignalHandled));
        assert!(daemon.shutdown_reason().unwrap().contains(&SIGINT.to_string()));
    }

    #[test]
    fn test_unhandled_signal_falls_back_to_ttl() {
        let mut daemon = Daemon::new();
        daemon.set_ttl(Some(Duration::from_millis(50)));
        daemon
            .run_with_callback(|d| {
                d.handle_signal(9);
                Ok(())
            })
            .unwrap();

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::TtlReached));
    }

    #[test]
    fn test_memory_trigger_stops_run() {
        let probe = FixedMemory::new(0);
        let growth = probe.clone();

        let mut daemon = Daemon::new();
        daemon
            .set_memory_threshold(Some(500 * 1024))
            .set_memory_probe(probe);
        daemon
            .run_with_callback(move |_| {
                growth.set(growth.get() + 100 * 1024);
                Ok(())
            })
            .unwrap();

        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::MemoryReached));
        // 500K is reached after 5 ticks and exceeded after 6
        assert_eq!(daemon.iterations(), 6);
    }

    #[test]
    fn test_struct_work_variant() {
        struct Countdown {
            remaining: u32,
        }

        impl Work for Countdown {
            fn execute(&mut self, daemon: &mut Daemon) -> std::result::Result<(), WorkError> {
                self.remaining -= 1;
                if self.remaining == 0 {
                    daemon.request_shutdown(ShutdownCode::Logic);
                }
                Ok(())
            }
        }

        let mut daemon = Daemon::builder().work(Countdown { remaining: 3 }).build();
        daemon.run().unwrap();
        assert_eq!(daemon.iterations(), 3);
        // work is kept for the next run
        assert!(daemon.has_work());
    }

    #[test]
    fn test_struct_failure_handler_variant() {
        #[derive(Default)]
        struct StopOnFailure;

        impl FailureHandler for StopOnFailure {
            fn handle(
                &mut self,
                _failure: WorkError,
                daemon: &mut Daemon,
            ) -> std::result::Result<(), WorkError> {
                daemon.request_shutdown(ShutdownCode::Custom(9));
                Ok(())
            }
        }

        let mut daemon = Daemon::builder()
            .callback(|_| Err("boom".into()))
            .failure_handler(StopOnFailure)
            .build();
        daemon.run().unwrap();
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::Custom(9)));
        assert!(daemon.has_failure_handler());
    }

    #[test]
    fn test_no_auto_reset_between_runs() {
        let mut daemon = null_daemon();
        daemon.request_shutdown(ShutdownCode::Logic);
        daemon.run().unwrap();
        daemon.run().unwrap();
        assert_eq!(daemon.iterations(), 0);

        daemon.reset_shutdown();
        assert!(!daemon.shutdown_pending());
        assert_eq!(daemon.shutdown_code(), None);

        daemon.set_ttl(Some(Duration::ZERO));
        daemon.run().unwrap();
        assert_eq!(daemon.shutdown_code(), Some(ShutdownCode::TtlReached));
    }

    #[test]
    fn test_builder() {
        let daemon = Daemon::builder()
            .ttl(Duration::from_secs(1))
            .loop_interval(Duration::from_millis(500))
            .memory_limit("10M")
            .unwrap()
            .signals(vec![SIGTERM])
            .callback(|_| Ok(()))
            .failure_callback(|_, _| Ok(()))
            .build();

        assert_eq!(daemon.ttl(), Some(Duration::from_secs(1)));
        assert_eq!(daemon.loop_interval(), Some(Duration::from_millis(500)));
        assert_eq!(daemon.memory_threshold(), Some(10 * 1024 * 1024));
        assert_eq!(daemon.handled_signals(), &[SIGTERM]);
        assert!(daemon.has_work());
        assert!(daemon.has_failure_handler());
    }

    #[test]
    fn test_builder_rejects_bad_memory_limit() {
        assert!(Daemon::builder().memory_limit("12X").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            ttl_secs: Some(12),
            memory_max: Some("1K".to_string()),
            loop_interval_us: Some(500_000),
            signals: vec![SIGTERM],
            ..Config::default()
        };

        let daemon = Daemon::from_config(&config).unwrap();
        assert_eq!(daemon.ttl(), Some(Duration::from_secs(12)));
        assert_eq!(daemon.memory_threshold(), Some(1024));
        assert_eq!(daemon.loop_interval(), Some(Duration::from_micros(500_000)));
        assert_eq!(daemon.handled_signals(), &[SIGTERM]);
    }

    #[test]
    fn test_stats() {
        let mut daemon = null_daemon();
        let stats = daemon.stats();
        assert!(stats.uptime.is_none());
        assert_eq!(stats.iterations, 0);

        daemon.set_ttl(Some(Duration::ZERO));
        daemon.run().unwrap();
        let stats = daemon.stats();
        assert!(stats.uptime.is_some());
        assert_eq!(stats.shutdown_code, Some(ShutdownCode::TtlReached));
        assert_eq!(stats.shutdown_reason.as_deref(), Some("TTL reached"));
    }
}
