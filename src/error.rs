//! Error handling for the Pi range camera crate.
//!
//! Errors are layered the same way the hardware is: [`ProtocolError`] covers a
//! single malformed frame, [`LinkError`] covers one request/response exchange
//! with the rangefinder, [`StreamFault`] covers the video side, and
//! [`ConsoleError`] is what construction and configuration paths return.
//! None of them is ever fatal to the process.

use crate::rangefinder::session::SessionState;

/// A specialized `Result` type for console construction and configuration.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// A received 8-byte frame failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer than 8 bytes were available
    #[error("short read: got {got} of 8 bytes")]
    ShortRead { got: usize },

    /// The frame did not start with `0x55 0xAA`
    #[error("bad frame header: {found:02x?}")]
    BadHeader { found: [u8; 2] },

    /// The checksum byte did not match the frame contents
    #[error("bad checksum: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },
}

/// A request/response exchange with the rangefinder failed.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Nothing arrived before the serial read timeout
    #[error("rangefinder did not answer before the read timeout")]
    Timeout,

    /// A frame arrived but was malformed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device answered with a non-success status byte
    #[error("measurement failed (status {status:#04x})")]
    MeasurementFailed { status: u8 },

    /// The device never echoed the expected command code
    #[error("no acknowledgement for command {command:#04x}")]
    NoAcknowledgement { command: u8 },

    /// Writing to or reading from the serial port failed
    #[error("serial I/O error: {0}")]
    Serial(#[from] std::io::Error),

    /// The session is in a state that does not allow the operation
    #[error("cannot {operation} while {state}")]
    NotReady {
        operation: &'static str,
        state: SessionState,
    },

    /// The device was marked unavailable by a failed probe or port open
    #[error("rangefinder unavailable")]
    DeviceUnavailable,
}

/// A video stream could not deliver a frame.
#[derive(Debug, thiserror::Error)]
pub enum StreamFault {
    /// The source could not be opened
    #[error("failed to open stream {url}: {reason}")]
    Open { url: String, reason: String },

    /// A frame arrived but could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The source ended
    #[error("end of stream")]
    EndOfStream,

    /// Reading from the underlying transport failed
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamFault {
    /// Create a new open failure for `url`
    pub fn open(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Open {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// The main error type for console construction and configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or configuring the serial port failed
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// GPIO operation failed (only available with gpio feature)
    #[cfg(feature = "gpio")]
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsoleError {
    /// Create a new GPIO error
    #[cfg(feature = "gpio")]
    pub fn gpio_error(msg: impl Into<String>) -> Self {
        Self::Gpio(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
