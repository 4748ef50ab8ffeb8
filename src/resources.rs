// Copyright 2023 James Gober. All rights reserved.
// Use of this source code is governed by Apache License
// that can be found in the LICENSE file.

//! # Memory Usage Probing
//!
//! The run loop compares the process's resident memory against its threshold
//! at every checkpoint. This module provides the probe it asks.
//!
//! - [`ProcessMemory`] reads the resident set size of the current process
//!   (`/proc/self/status` on Linux, `ps` on macOS).
//! - [`FixedMemory`] reports a settable value, for tests and simulations.
//!
//! ## Example
//!
//! ```rust
//! use loop_daemon::resources::{MemoryProbe, ProcessMemory};
//!
//! let probe = ProcessMemory::new();
//! let bytes = probe.resident_bytes().unwrap_or(0);
//! println!("RSS: {bytes} bytes");
//! ```

use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;
#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::error::Error;

#[cfg(target_os = "linux")]
use std::fs::File;
#[cfg(target_os = "linux")]
use std::io::{BufRead, BufReader};

#[cfg(target_os = "macos")]
use std::process::Command;

/// Source of the current memory usage, in bytes.
pub trait MemoryProbe {
    /// Returns the resident memory of the monitored process.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform data cannot be read.
    fn resident_bytes(&self) -> Result<u64>;
}

/// Resident set size of the current process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: u32,
}

impl ProcessMemory {
    /// Creates a probe for the current process
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
        }
    }

    /// The process ID being monitored
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(target_os = "linux")]
    fn get_memory_linux(pid: u32) -> Result<u64> {
        // Read memory information from /proc/[pid]/status
        let path = format!("/proc/{pid}/status");
        let file = File::open(&path).map_err(|e| {
            Error::io_with_source(format!("Failed to open {path} for memory stats"), e)
        })?;

        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line
                .map_err(|e| Error::io_with_source("Failed to read process memory stats", e))?;

            // VmRSS gives the resident set size
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                return parse_kib(rest).ok_or_else(|| {
                    Error::io(format!("Unexpected VmRSS line in {path}: {line}"))
                });
            }
        }

        Err(Error::io(format!("No VmRSS entry found in {path}")))
    }

    #[cfg(target_os = "macos")]
    fn get_memory_macos(pid: u32) -> Result<u64> {
        // Use ps command to get memory usage on macOS
        let output = Command::new("ps")
            .args(["-o", "rss=", "-p", &pid.to_string()])
            .output()
            .map_err(|e| {
                Error::io_with_source("Failed to execute ps command for memory stats", e)
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_kib(&stdout)
            .ok_or_else(|| Error::io(format!("Unexpected ps output for memory stats: {stdout}")))
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> Result<u64> {
        #[cfg(target_os = "linux")]
        {
            Self::get_memory_linux(self.pid)
        }

        #[cfg(target_os = "macos")]
        {
            Self::get_memory_macos(self.pid)
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Err(crate::error::Error::io_with_code(
                crate::error::ErrorCode::PlatformNotSupported,
                "Resident memory probing is not supported on this platform",
            ))
        }
    }
}

/// Parses a `"<n> kB"` style value into bytes.
#[cfg(any(target_os = "linux", target_os = "macos", test))]
fn parse_kib(value: &str) -> Option<u64> {
    value
        .split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Probe reporting a value chosen by the caller.
///
/// Clones share the same value, so a test can keep one handle and move the
/// other into the controller.
#[derive(Debug, Clone, Default)]
pub struct FixedMemory {
    bytes: Rc<Cell<u64>>,
}

impl FixedMemory {
    /// Creates a probe reporting `bytes`
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Rc::new(Cell::new(bytes)),
        }
    }

    /// Changes the reported value
    pub fn set(&self, bytes: u64) {
        self.bytes.set(bytes);
    }

    /// The currently reported value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.bytes.get()
    }
}

impl MemoryProbe for FixedMemory {
    fn resident_bytes(&self) -> Result<u64> {
        Ok(self.bytes.get())
    }
}
