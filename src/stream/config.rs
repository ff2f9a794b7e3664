//! Video source configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// At most this many streams are kept from a catalogue.
pub const MAX_STREAMS: usize = 8;

/// Output and reconnect settings shared by every video source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Target frame rate
    pub fps: f64,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Connection timeout for opening a source, in seconds
    pub reconnect_timeout_secs: f64,
    /// Pause between releasing a failed session and reopening it
    pub reopen_pause_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: crate::DEFAULT_FPS,
            width: crate::DEFAULT_FRAME_WIDTH,
            height: crate::DEFAULT_FRAME_HEIGHT,
            reconnect_timeout_secs: 2.0,
            reopen_pause_ms: 100,
        }
    }
}

impl VideoConfig {
    /// Set the target frame rate.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Set the output dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the pause before reopening a failed source.
    pub fn with_reopen_pause_ms(mut self, ms: u64) -> Self {
        self.reopen_pause_ms = ms;
        self
    }

    /// Minimum spacing between two delivered frames.
    pub fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_timeout_secs.max(0.0))
    }

    pub fn reopen_pause(&self) -> Duration {
        Duration::from_millis(self.reopen_pause_ms)
    }
}

/// A named video source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    /// Display name
    pub name: String,
    /// Source URL (`http(s)://`, `tcp://host:port` or a file path)
    pub url: String,
}

impl StreamEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Built-in catalogue of public MJPEG cameras.
pub fn default_streams() -> Vec<StreamEndpoint> {
    vec![
        StreamEndpoint::new(
            "Norwegian cam 1",
            "http://109.247.15.178:6001/mjpg/video.mjpg",
        ),
        StreamEndpoint::new("beach", "http://85.196.146.82:3337/mjpg/video.mjpg"),
        StreamEndpoint::new("boats club", "http://213.236.250.78/mjpg/video.mjpg"),
        StreamEndpoint::new(
            "park",
            "http://192.171.163.3/?id=3324&imagePath=/mjpg/video.mjpg&size=1",
        ),
    ]
}

/// Drop entries without a name or URL and keep at most [`MAX_STREAMS`].
pub fn sanitize_streams(streams: Vec<StreamEndpoint>) -> Vec<StreamEndpoint> {
    let total = streams.len();
    let valid: Vec<StreamEndpoint> = streams
        .into_iter()
        .filter(|s| {
            let ok = !s.name.trim().is_empty() && !s.url.trim().is_empty();
            if !ok {
                warn!("Ignoring stream entry without name or url: {:?}", s);
            }
            ok
        })
        .take(MAX_STREAMS)
        .collect();

    if total > MAX_STREAMS {
        warn!("Stream catalogue truncated to the first {} entries", MAX_STREAMS);
    }
    valid
}

/// How long the supervisor waits after a failed reconnect episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same pause after every failed episode
    Fixed { interval_ms: u64 },
    /// Pause doubles per consecutive failed episode, up to `max_ms`
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 500,
            max_ms: 8_000,
        }
    }
}

impl ReconnectPolicy {
    /// Cooldown after `failed_episodes` consecutive failed episodes.
    pub fn cooldown(&self, failed_episodes: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            ReconnectPolicy::Exponential { initial_ms, max_ms } => {
                let shift = failed_episodes.saturating_sub(1).min(31);
                let ms = initial_ms.saturating_mul(1u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}
