//! Signal capture for the run loop.
//!
//! Each controller owns a [`SignalListener`] created at `initialize()` time.
//! Delivered signals are queued by `signal-hook`'s self-pipe and only observed
//! when the loop drains them at a checkpoint, so a signal never interrupts a
//! unit of work halfway through.

use tracing::{debug, info};

use crate::error::Result;

pub use signal_hook::consts::{SIGINT, SIGTERM};

/// Signals treated as shutdown triggers unless configured otherwise.
pub const DEFAULT_SIGNALS: [i32; 2] = [SIGTERM, SIGINT];

/// Returns the default handled signal set (terminate, interrupt).
#[must_use]
pub fn default_signals() -> Vec<i32> {
    DEFAULT_SIGNALS.to_vec()
}

/// Per-instance queue of delivered OS signals.
pub struct SignalListener {
    handled: Vec<i32>,
    #[cfg(unix)]
    signals: signal_hook::iterator::Signals,
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener")
            .field("handled", &self.handled)
            .finish_non_exhaustive()
    }
}

impl SignalListener {
    /// Register handlers for every signal in `handled`.
    ///
    /// # Errors
    ///
    /// Returns a signal error if one of the signals cannot be handled, for
    /// example `SIGKILL` or `SIGSTOP`.
    #[cfg(unix)]
    pub fn install(handled: &[i32]) -> Result<Self> {
        use crate::error::Error;

        // registering one of these panics inside signal-hook
        if let Some(&signal) = handled
            .iter()
            .find(|&&signal| signal_hook::consts::FORBIDDEN.contains(&signal))
        {
            return Err(Error::signal(
                format!(
                    "Cannot handle {} ({signal}): the signal cannot be caught",
                    signal_description(signal)
                ),
                Some(signal),
            ));
        }

        let signals = signal_hook::iterator::Signals::new(std::iter::empty::<i32>())
            .map_err(|e| Error::signal_with_source("Failed to create signal listener", None, e))?;

        for &signal in handled {
            signals.add_signal(signal).map_err(|e| {
                Error::signal_with_source(
                    format!(
                        "Failed to register handler for {} ({signal})",
                        signal_description(signal)
                    ),
                    Some(signal),
                    e,
                )
            })?;
        }

        info!(signals = ?handled, "Signal handlers registered");
        Ok(Self {
            handled: handled.to_vec(),
            signals,
        })
    }

    /// Signal delivery is not available on this platform; the listener
    /// stays empty and only direct `handle_signal` calls have an effect.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn install(handled: &[i32]) -> Result<Self> {
        debug!(signals = ?handled, "Signal delivery unsupported on this platform");
        Ok(Self {
            handled: handled.to_vec(),
        })
    }

    /// Signals this listener was registered for
    #[must_use]
    pub fn handled(&self) -> &[i32] {
        &self.handled
    }

    /// Returns every signal delivered since the previous drain, in order.
    /// Never blocks.
    pub fn drain(&mut self) -> Vec<i32> {
        #[cfg(unix)]
        let pending: Vec<i32> = self.signals.pending().collect();
        #[cfg(not(unix))]
        let pending: Vec<i32> = Vec::new();

        if !pending.is_empty() {
            debug!(signals = ?pending, "Drained pending signals");
        }
        pending
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.signals.handle().close();
        debug!(signals = ?self.handled, "Signal listener closed");
    }
}

/// Helper function to get a human-readable description of a signal.
#[must_use]
pub const fn signal_description(signal: i32) -> &'static str {
    match signal {
        1 => "SIGHUP (Hangup)",
        2 => "SIGINT (Interrupt/Ctrl+C)",
        3 => "SIGQUIT (Quit)",
        6 => "SIGABRT (Abort)",
        9 => "SIGKILL (Kill - non-catchable)",
        15 => "SIGTERM (Terminate)",
        _ => "Unknown signal",
    }
}
