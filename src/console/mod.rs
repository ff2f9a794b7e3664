//! Console wiring: configuration and the owned application context.

pub mod config;
pub mod context;

pub use config::ConsoleConfig;
pub use context::{distance_text, ConsoleContext, HardwareConsole, HudSnapshot, Tick};
