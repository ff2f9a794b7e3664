//! Frame-paced reader for one video source with reconnect-on-failure.

use super::config::VideoConfig;
use super::decoder::{resize_to, DecoderFactory, FrameDecoder, Image};
use crate::error::StreamFault;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection state of a [`StreamSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Closed,
    Open,
    Reconnecting,
}

/// Settings for a single source.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub url: String,
    pub frame_interval: Duration,
    pub width: u32,
    pub height: u32,
    pub reconnect_timeout: Duration,
    pub reopen_pause: Duration,
}

impl StreamConfig {
    /// Settings for `url` using the shared video settings.
    pub fn new(url: impl Into<String>, video: &VideoConfig) -> Self {
        Self {
            url: url.into(),
            frame_interval: video.frame_interval(),
            width: video.width,
            height: video.height,
            reconnect_timeout: video.reconnect_timeout(),
            reopen_pause: video.reopen_pause(),
        }
    }
}

/// Delivers decoded, resized frames from one source at a bounded rate.
///
/// The source owns at most one decode session at a time. A failed session
/// is released before a new one is opened.
pub struct StreamSource<F: DecoderFactory> {
    config: StreamConfig,
    factory: F,
    decoder: Option<F::Decoder>,
    state: StreamState,
    last_frame_at: Option<Instant>,
}

impl<F: DecoderFactory> StreamSource<F> {
    /// Create a closed source. Nothing is opened until [`open`](Self::open)
    /// or [`read`](Self::read).
    pub fn new(config: StreamConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            decoder: None,
            state: StreamState::Closed,
            last_frame_at: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether a live decode session exists.
    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    /// Establish the decode session. Failure leaves the source `Closed`.
    pub fn open(&mut self) -> bool {
        if self.decoder.is_some() {
            return true;
        }

        match self
            .factory
            .open(&self.config.url, self.config.reconnect_timeout)
        {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                self.state = StreamState::Open;
                self.last_frame_at = None;
                true
            }
            Err(e) => {
                warn!("Stream {} unavailable: {}", self.config.url, e);
                self.state = StreamState::Closed;
                false
            }
        }
    }

    /// Read the next frame, or `None` if there is none this call.
    ///
    /// A closed source only attempts to open and returns `None`. An open
    /// source waits out the rest of the frame interval, then decodes. On
    /// end-of-stream or a decode fault the session is released, reopened
    /// after a short pause, and `None` is returned.
    pub fn read(&mut self) -> Option<Image> {
        if self.decoder.is_none() {
            self.open();
            return None;
        }

        self.pace();

        let result = match self.decoder.as_mut() {
            Some(decoder) => decoder.next_frame(),
            None => return None,
        };

        match result {
            Ok(Some(image)) => {
                self.last_frame_at = Some(Instant::now());
                Some(resize_to(image, self.config.width, self.config.height))
            }
            Ok(None) => {
                self.recover(StreamFault::EndOfStream);
                None
            }
            Err(fault) => {
                self.recover(fault);
                None
            }
        }
    }

    /// Drop the decode session.
    pub fn release(&mut self) {
        if self.decoder.take().is_some() {
            debug!("Released stream {}", self.config.url);
        }
        self.state = StreamState::Closed;
    }

    fn pace(&self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.frame_interval {
                std::thread::sleep(self.config.frame_interval - elapsed);
            }
        }
    }

    fn recover(&mut self, fault: StreamFault) {
        warn!("Stream {} failed: {}. Reconnecting", self.config.url, fault);
        self.release();
        self.state = StreamState::Reconnecting;
        std::thread::sleep(self.config.reopen_pause);
        if self.open() {
            info!("Stream {} reopened", self.config.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mock::{ScriptedFactory, Step};

    fn config(url: &str, fps: f64) -> StreamConfig {
        let video = VideoConfig::default()
            .with_fps(fps)
            .with_size(32, 24)
            .with_reopen_pause_ms(1);
        StreamConfig::new(url, &video)
    }

    #[test]
    fn test_read_opens_closed_source_without_frame() {
        let factory = ScriptedFactory::new();
        factory.online("cam", 64, 48);
        let mut source = StreamSource::new(config("cam", 30.0), factory.clone());

        assert_eq!(source.state(), StreamState::Closed);
        assert!(source.read().is_none());
        assert!(source.is_open());
        assert_eq!(source.state(), StreamState::Open);

        let frame = source.read().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
    }

    #[test]
    fn test_open_failure_stays_closed() {
        let factory = ScriptedFactory::new();
        factory.offline("cam");
        let mut source = StreamSource::new(config("cam", 30.0), factory.clone());

        assert!(!source.open());
        assert_eq!(source.state(), StreamState::Closed);
        assert!(source.read().is_none());
        assert_eq!(factory.open_count("cam"), 2);
    }

    #[test]
    fn test_frames_are_paced() {
        let factory = ScriptedFactory::new();
        factory.online("cam", 8, 8);
        let mut source = StreamSource::new(config("cam", 30.0), factory);
        assert!(source.open());

        let tolerance = Duration::from_millis(2);
        source.read().unwrap();
        let first = Instant::now();
        source.read().unwrap();
        assert!(first.elapsed() + tolerance >= Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_fault_reopens_with_single_session() {
        let factory = ScriptedFactory::new();
        factory.scripted("cam", &[Step::Frame, Step::Fault, Step::Frame], false, (8, 8));
        let mut source = StreamSource::new(config("cam", 200.0), factory.clone());
        assert!(source.open());

        assert!(source.read().is_some());
        assert!(source.read().is_none());
        assert!(source.is_open());
        assert_eq!(factory.open_count("cam"), 2);
        assert!(source.read().is_some());

        assert_eq!(factory.max_live_decoders(), 1);
    }

    #[test]
    fn test_end_of_stream_reconnects() {
        let factory = ScriptedFactory::new();
        factory.scripted("cam", &[Step::End], true, (8, 8));
        let mut source = StreamSource::new(config("cam", 200.0), factory.clone());
        assert!(source.open());

        assert!(source.read().is_none());
        assert_eq!(factory.open_count("cam"), 2);
        assert!(source.read().is_some());
    }

    #[test]
    fn test_failed_reopen_leaves_closed() {
        let factory = ScriptedFactory::new();
        factory.scripted("cam", &[Step::Fault], true, (8, 8));
        let mut source = StreamSource::new(config("cam", 200.0), factory.clone());
        assert!(source.open());
        factory.set_online("cam", false);

        assert!(source.read().is_none());
        assert!(!source.is_open());
        assert_eq!(source.state(), StreamState::Closed);
    }

    #[test]
    fn test_release() {
        let factory = ScriptedFactory::new();
        factory.online("cam", 8, 8);
        let mut source = StreamSource::new(config("cam", 30.0), factory.clone());
        assert!(source.open());
        source.release();
        assert!(!source.is_open());
        assert_eq!(factory.live_decoders(), 0);
    }
}
