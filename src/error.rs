//! Custom error types for the crate.
//!
//! `ScanError` is the single error type surfaced by the instrument drivers
//! and the orchestrator. Using the `thiserror` crate, it keeps the failure
//! taxonomy explicit:
//!
//! - **`Connection`**: the serial port could not be opened or the transport
//!   failed mid-session.
//! - **`Config`**: the settings or limit file is missing or malformed. These
//!   are fatal to startup; there is no degraded mode.
//! - **`Calibration`**: the limit-calibration sequence produced an
//!   implausible measurement. Nothing is persisted in that case.
//! - **`Stall`**: the device reported a nonzero error code after a move.
//!   Recoverable; callers may clear the device error and continue.
//! - **`Timeout`**: a bounded poll (motion flag or response) exceeded its
//!   configured limit, or the operation was cancelled while polling.
//! - **`Protocol`**: a device reply that cannot be interpreted.
//! - **`State`**: an operation issued from the wrong controller state, such
//!   as a move before the travel limit is known.
//! - **`Io`**: plain I/O failure on a transport or store.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors produced by the motor driver, flash driver, stores, and
/// orchestrator.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Serial port unavailable or transport failure.
    #[error("Connection error: {0}")]
    Connection(#[from] serialport::Error),

    /// Missing or malformed settings/limit file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Limit calibration produced an implausible measurement.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Device error code was nonzero after a move completed.
    #[error("Motor stalled (error code {code}) at position {position}")]
    Stall {
        /// Device error code as reported by the `ER` variable.
        code: i64,
        /// Encoder position at which the stall was detected.
        position: i64,
    },

    /// A bounded poll loop exceeded its configured limit.
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was being polled for.
        what: String,
        /// How long the poll ran before giving up.
        waited: Duration,
    },

    /// Run cancelled from outside while polling or between scan legs.
    #[error("Operation cancelled")]
    Cancelled,

    /// Device reply that does not fit the line protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation attempted from the wrong controller state.
    #[error("Cannot {op} while {state}")]
    State {
        /// The rejected operation.
        op: &'static str,
        /// The controller state at the time.
        state: &'static str,
    },

    /// I/O error on a transport or store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// True for errors the orchestrator treats as recoverable within a run.
    pub fn is_stall(&self) -> bool {
        matches!(self, ScanError::Stall { .. })
    }
}
