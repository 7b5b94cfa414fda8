//! Custom error types for the sequencer.
//!
//! This module defines the primary error type, `ImagingError`, shared by the device
//! layer and the session engine. Using the `thiserror` crate, it gives one consistent
//! taxonomy for everything that can go wrong between parsing a device identity and
//! writing the last frame of a night.
//!
//! ## Error Hierarchy
//!
//! - **Identity errors** (`MalformedIdentity`, `UnknownKind`): a persisted or
//!   user-supplied device identity string could not be decoded.
//! - **Construction errors** (`DriverInstantiation`, `InvalidSetup`): raised before a
//!   session starts. They are surfaced to the caller and the session never runs.
//! - **`Connection`**: a required device never reached `connected = true`. Fatal, the
//!   session aborts before any target is processed.
//! - **Recoverable per-target conditions** (`SlewRejected`, `SlewTimeout`,
//!   `GuideStartFailure`): handled inside the per-target step; the target is skipped.
//! - **Fatal per-target conditions** (`ClockUnavailable`, `ExposureTimeout`,
//!   `Unhandled`): the target loop stops, session teardown still runs.
//!
//! Driver contracts return `anyhow::Result`; the engine converts those failures into
//! the variants above at the step boundary.

use thiserror::Error;

use crate::device::DeviceKind;

/// Convenience alias for results using the sequencer error type.
pub type AppResult<T> = std::result::Result<T, ImagingError>;

/// Errors raised by the device layer and the session engine.
#[derive(Error, Debug)]
pub enum ImagingError {
    /// A device identity string could not be decoded
    #[error("Malformed device identity '{input}': {reason}")]
    MalformedIdentity {
        /// The offending text
        input: String,
        /// Which part of the identity is wrong
        reason: String,
    },

    /// A device identity named a kind this crate does not know
    #[error("Unknown device kind '{0}'")]
    UnknownKind(String),

    /// No backend could build a driver for a device
    #[error("Driver instantiation failed for {device}: {reason}")]
    DriverInstantiation {
        /// Encoded identity of the device
        device: String,
        /// Backend message
        reason: String,
    },

    /// The device wrapper has already released its driver
    #[error("Device {0} has already been disposed")]
    Disposed(String),

    /// Connecting a device failed
    #[error("Device {device} could not connect: {reason}")]
    Connection {
        /// Encoded identity of the device
        device: String,
        /// Driver message
        reason: String,
    },

    /// The equipment does not form a usable setup
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    /// A target has an empty name or out-of-range coordinates
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The mount refused to start a slew
    #[error("Slew to '{target}' rejected: {reason}")]
    SlewRejected {
        /// Target name
        target: String,
        /// Why the slew did not start
        reason: String,
    },

    /// The mount kept slewing past the failsafe
    #[error("Slew to '{target}' still running after {polls} polls")]
    SlewTimeout {
        /// Target name
        target: String,
        /// Status polls spent waiting
        polls: u32,
    },

    /// Guiding never settled within the allowed attempts
    #[error("Guiding on '{target}' failed to start after {attempts} attempts")]
    GuideStartFailure {
        /// Target name
        target: String,
        /// Attempts made
        attempts: u32,
    },

    /// The mount could not report its UTC time
    #[error("Mount clock unavailable: {0}")]
    ClockUnavailable(String),

    /// A camera never reported its image as ready
    #[error("Exposure of '{target}' not ready after {polls} polls")]
    ExposureTimeout {
        /// Target name
        target: String,
        /// Image-ready polls spent waiting
        polls: u32,
    },

    /// A driver failure with no dedicated handling
    #[error("Unhandled error: {0}")]
    Unhandled(String),

    /// The session was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A device of the wrong kind was placed in a slot
    #[error("Expected a {expected} device, got {actual}")]
    KindMismatch {
        /// Kind the slot accepts
        expected: DeviceKind,
        /// Kind of the device supplied
        actual: DeviceKind,
    },

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more devices failed to release; every device was still attempted
    #[error("Teardown finished with {} error(s)", .0.len())]
    TeardownFailed(Vec<ImagingError>),
}

impl ImagingError {
    /// Whether the engine handles this condition by skipping the current target.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ImagingError::SlewRejected { .. }
                | ImagingError::SlewTimeout { .. }
                | ImagingError::GuideStartFailure { .. }
        )
    }

    pub(crate) fn unhandled(err: impl std::fmt::Display) -> Self {
        ImagingError::Unhandled(format!("{:#}", err))
    }
}

impl From<anyhow::Error> for ImagingError {
    fn from(err: anyhow::Error) -> Self {
        ImagingError::unhandled(err)
    }
}
