//! Rangefinder configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The device needs at least this long after power-enable before it
/// accepts commands.
pub const MIN_SETTLE_DELAY_MS: u64 = 200;

/// How the module is used once powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    /// On-demand single-shot measurements
    #[default]
    Single,
    /// Device-driven measurement stream, started on power-up
    Continuous,
}

/// Serial, GPIO and timing settings for one rangefinder module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangefinderConfig {
    /// UART device path
    pub port: String,
    /// UART speed (always 8-N-1)
    pub baud_rate: u32,
    /// BCM pin driving the module's power-enable input
    pub enable_pin: u8,
    /// Measurement mode entered on power-up
    pub mode: MeasureMode,
    /// Wait after power-enable, in milliseconds
    pub settle_delay_ms: u64,
    /// Bound on a single 8-byte response read, in milliseconds
    pub read_timeout_ms: u64,
    /// Probe attempts before the device is declared unavailable
    pub probe_attempts: u32,
}

impl Default for RangefinderConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: crate::DEFAULT_BAUD_RATE,
            enable_pin: crate::DEFAULT_ENABLE_PIN,
            mode: MeasureMode::Single,
            settle_delay_ms: 300,
            read_timeout_ms: 2000,
            probe_attempts: 3,
        }
    }
}

impl RangefinderConfig {
    /// Create a configuration for `port` with the enable line on `enable_pin`.
    pub fn new(port: impl Into<String>, enable_pin: u8) -> Self {
        Self {
            port: port.into(),
            enable_pin,
            ..Default::default()
        }
    }

    /// Set the measurement mode.
    pub fn with_mode(mut self, mode: MeasureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the post-power-on settle delay.
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Set the number of probe attempts.
    pub fn with_probe_attempts(mut self, attempts: u32) -> Self {
        self.probe_attempts = attempts;
        self
    }

    /// Settle delay, never shorter than the device minimum.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.max(MIN_SETTLE_DELAY_MS))
    }

    /// Read timeout for one response frame.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
