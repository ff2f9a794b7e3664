//! # Pi Rangecam - Raspberry Pi Camera Console Core
//!
//! The hardware-facing core of a Raspberry Pi camera console: a UART driver
//! for a laser rangefinder module and a resilient reader for remote MJPEG
//! video streams. Both keep a correct, recoverable session over an
//! unreliable external channel.
//!
//! ## Features
//!
//! - **Rangefinder driver**: 8-byte frame codec, power-enable line, single-shot
//!   and continuous measurement, availability probing
//! - **Stream reader**: frame-rate pacing, fault detection, reconnect and
//!   round-robin failover across a stream catalogue
//! - **Status events**: state changes and failures broadcast for the HUD
//! - **GPIO support**: real power-enable line behind the `gpio` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pi_rangecam::{ConsoleConfig, HardwareConsole};
//!
//! let config = ConsoleConfig::default();
//! let mut console = HardwareConsole::open(&config);
//!
//! if let Some(reading) = console.request_single_measurement() {
//!     println!("{}", reading);
//! }
//! let tick = console.tick();
//! println!("{}", tick.hud.distance_text);
//! console.shutdown();
//! ```

pub mod console;
pub mod error;
pub mod rangefinder;
pub mod status;
pub mod stream;

// Re-export public API
pub use console::{ConsoleConfig, ConsoleContext, HardwareConsole, HudSnapshot, Tick};
pub use error::{ConsoleError, LinkError, ProtocolError, Result, StreamFault};
pub use rangefinder::{
    HardwareSession, MeasureMode, Measurement, RangefinderConfig, RangefinderLink,
    RangefinderSession, SessionState,
};
pub use status::{StatusBus, StatusEvent};
pub use stream::{
    MjpegFactory, ReconnectPolicy, StreamEndpoint, StreamSource, StreamState, StreamSupervisor,
    VideoConfig,
};

/// The default rangefinder UART
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";

/// The default rangefinder baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// The default BCM pin driving the rangefinder power-enable line
pub const DEFAULT_ENABLE_PIN: u8 = 17;

/// The default video frame rate
pub const DEFAULT_FPS: f64 = 30.0;

/// The default output frame width
pub const DEFAULT_FRAME_WIDTH: u32 = 1024;

/// The default output frame height
pub const DEFAULT_FRAME_HEIGHT: u32 = 600;
