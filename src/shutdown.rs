//! Shutdown codes recorded when the run loop stops.
//!
//! Every way the loop can end normally maps to a [`ShutdownCode`]. The four
//! built-in codes carry a fixed human-readable reason; callers may also record
//! their own numeric code through [`ShutdownCode::Custom`].

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownCode {
    /// Shutdown requested by the code itself
    Logic,
    /// The configured time to live elapsed
    TtlReached,
    /// Resident memory went over the configured threshold
    MemoryReached,
    /// A handled OS signal was received
    SignalHandled,
    /// Caller-defined code
    Custom(i32),
}

impl ShutdownCode {
    /// Numeric value of the code, also used as process exit status.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Logic => 1,
            Self::TtlReached => 2,
            Self::MemoryReached => 3,
            Self::SignalHandled => 4,
            Self::Custom(code) => code,
        }
    }

    /// Fixed reason text for the built-in codes.
    #[must_use]
    pub const fn default_reason(self) -> Option<&'static str> {
        match self {
            Self::Logic => Some("Logic shutdown"),
            Self::TtlReached => Some("TTL reached"),
            Self::MemoryReached => Some("Memory threshold reached"),
            Self::SignalHandled => Some("Signal handled"),
            Self::Custom(_) => None,
        }
    }
}

impl Default for ShutdownCode {
    fn default() -> Self {
        Self::Logic
    }
}

impl From<i32> for ShutdownCode {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Logic,
            2 => Self::TtlReached,
            3 => Self::MemoryReached,
            4 => Self::SignalHandled,
            other => Self::Custom(other),
        }
    }
}

impl From<ShutdownCode> for i32 {
    fn from(code: ShutdownCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ShutdownCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logic => write!(f, "Logic"),
            Self::TtlReached => write!(f, "TtlReached"),
            Self::MemoryReached => write!(f, "MemoryReached"),
            Self::SignalHandled => write!(f, "SignalHandled"),
            Self::Custom(code) => write!(f, "Custom({code})"),
        }
    }
}
