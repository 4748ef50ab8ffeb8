//! Error handling for the loop-daemon controller.
//!
//! Errors fall in three groups:
//!
//! * **Configuration** errors are raised synchronously while configuring the
//!   controller or when [`Daemon::run`](crate::Daemon::run) is called without
//!   any work. They are never retried.
//! * **Work failures** are whatever the work callback returned. They are
//!   wrapped transparently so the caller sees the original failure, and can
//!   take it back out with [`Error::into_work_failure`].
//! * **Collaborator** errors come from the surrounding layers: signal
//!   registration, lock files, memory probes and the command runner.
//!
//! Shutdown triggers (TTL, memory, signal, request) are *not* errors; they
//! are recorded on the controller as a [`ShutdownCode`](crate::ShutdownCode).
//!
//! ```no_run
//! use loop_daemon::{Daemon, Error};
//!
//! let mut daemon = Daemon::new();
//! match daemon.run() {
//!     Err(err) if err.is_config_error() => eprintln!("misconfigured: {err}"),
//!     Err(err) => eprintln!("work failed: {err}"),
//!     Ok(()) => println!("stopped: {:?}", daemon.shutdown_reason()),
//! }
//! # let _ = Error::config("unused");
//! ```

use crate::daemon::WorkError;

/// Result type alias for loop-daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error code enum for categorizing and identifying errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Configuration errors: 1000-1999
    /// A configuration value is invalid
    ConfigInvalid = 1000,
    /// A value could not be parsed (e.g. a memory string)
    ConfigInvalidFormat = 1001,
    /// A required setting is missing
    ConfigMissing = 1002,
    /// The configuration sources could not be loaded
    ConfigLoad = 1003,

    // Signal handling errors: 2000-2999
    /// Registering a signal handler failed
    SignalRegisterFailed = 2000,

    // Work errors: 3000-3999
    /// The unit of work failed
    WorkFailed = 3000,

    // IO errors: 5000-5999
    /// Generic I/O failure
    IoError = 5000,

    // Lock errors: 6000-6999
    /// The exclusive-execution lock is held elsewhere
    LockContended = 6000,
    /// The lock could not be created or released
    LockFailed = 6001,

    // Platform errors: 10000-10999
    /// The current platform cannot provide the requested data
    PlatformNotSupported = 10000,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigInvalidFormat => "CONFIG_INVALID_FORMAT",
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ConfigLoad => "CONFIG_LOAD",
            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",
            Self::WorkFailed => "WORK_FAILED",
            Self::IoError => "IO_ERROR",
            Self::LockContended => "LOCK_CONTENDED",
            Self::LockFailed => "LOCK_FAILED",
            Self::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
        }
    }
}

/// Error type for all controller and collaborator operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error [{code}]: {message}")]
    Config {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Failure raised by the unit of work, passed through unchanged
    #[error(transparent)]
    Work(WorkError),

    /// Another instance of the named job holds the exclusive lock
    #[error("Command \"{name}\" is already in use")]
    AlreadyRunning {
        /// Logical job name
        name: String,
    },

    /// Signal handling errors
    #[error("Signal handling error [{code}]: {message}")]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Signal number if applicable
        signal: Option<i32>,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// I/O operation errors
    #[error("I/O error [{code}]: {message}")]
    Io {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::config_with_code(ErrorCode::ConfigInvalid, message)
    }

    /// Create a new configuration error with specific code.
    pub fn config_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create the error raised for a malformed value such as `"12X"`.
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::config_with_code(ErrorCode::ConfigInvalidFormat, message)
    }

    /// Create the error raised when `run()` finds no work to execute.
    pub fn missing_work() -> Self {
        Self::config_with_code(
            ErrorCode::ConfigMissing,
            "no work configured: set a callback or a Work implementation before running",
        )
    }

    /// Wrap a failure raised by the unit of work.
    #[must_use]
    pub fn work(failure: WorkError) -> Self {
        Self::Work(failure)
    }

    /// Create the error raised when the job lock is already held.
    pub fn already_running<S: Into<String>>(name: S) -> Self {
        Self::AlreadyRunning { name: name.into() }
    }

    /// Create a new signal error with signal number.
    pub fn signal<S: Into<String>>(message: S, signal: Option<i32>) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            signal,
            source: None,
        }
    }

    /// Create a new signal error with signal number and source.
    pub fn signal_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        signal: Option<i32>,
        source: E,
    ) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            signal,
            source: Some(Box::new(source)),
        }
    }

    /// Create a new I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            code: ErrorCode::IoError,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new I/O error with specific code.
    pub fn io_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Io {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new I/O error with source error.
    pub fn io_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Io {
            code: ErrorCode::IoError,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lock failure (not contention) with source error.
    pub fn lock_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Io {
            code: ErrorCode::LockFailed,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The structured code of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { code, .. } | Self::Signal { code, .. } | Self::Io { code, .. } => *code,
            Self::Work(_) => ErrorCode::WorkFailed,
            Self::AlreadyRunning { .. } => ErrorCode::LockContended,
        }
    }

    /// Check if this error is configuration-related.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Check if this error is a failure of the unit of work.
    #[must_use]
    pub const fn is_work_failure(&self) -> bool {
        matches!(self, Self::Work(_))
    }

    /// Check if this error reports lock contention.
    #[must_use]
    pub const fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }

    /// Take back the original work failure, if this is one.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when the error is not a work failure.
    pub fn into_work_failure(self) -> std::result::Result<WorkError, Self> {
        match self {
            Self::Work(failure) => Ok(failure),
            other => Err(other),
        }
    }

    /// Get the error category for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Work(_) => "work",
            Self::AlreadyRunning { .. } => "lock",
            Self::Signal { .. } => "signal",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_with_source(format!("I/O operation failed: {err}"), err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            code: ErrorCode::ConfigLoad,
            message: format!("Configuration loading failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}
