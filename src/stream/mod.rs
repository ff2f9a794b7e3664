//! Resilient video stream reading.
//!
//! A [`StreamSource`] reads one MJPEG source at a bounded frame rate and
//! reopens it after faults. A [`StreamSupervisor`] keeps one source active
//! out of a catalogue and fails over round-robin when it stops delivering.

pub mod config;
pub mod decoder;
pub mod mjpeg;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod source;
pub mod supervisor;

// Re-export commonly used items
pub use config::{default_streams, ReconnectPolicy, StreamEndpoint, VideoConfig, MAX_STREAMS};
pub use decoder::{DecoderFactory, FrameDecoder, Image};
pub use mjpeg::{MjpegDecoder, MjpegFactory};
pub use source::{StreamConfig, StreamSource, StreamState};
pub use supervisor::StreamSupervisor;
