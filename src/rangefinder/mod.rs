//! Laser rangefinder driver.
//!
//! This module provides the UART driver for the rangefinder module: the
//! 8-byte frame codec, the raw request/response link with its power-enable
//! line, and the session state machine that callers actually use.

pub mod codec;
pub mod config;
pub mod hal;
pub mod link;
pub mod measurement;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod session;

// Re-export commonly used items
pub use codec::ResponseFrame;
pub use config::{MeasureMode, RangefinderConfig};
pub use hal::{Delay, DefaultPowerLine, PowerLine, SerialChannel, SerialPortChannel, StdDelay};
pub use link::{HardwareLink, RangefinderLink};
pub use measurement::Measurement;
pub use session::{ContinuousReadings, HardwareSession, RangefinderSession, SessionState};
