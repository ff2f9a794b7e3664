//! Console configuration.

use crate::error::{ConsoleError, Result};
use crate::rangefinder::RangefinderConfig;
use crate::stream::config::{default_streams, sanitize_streams};
use crate::stream::{ReconnectPolicy, StreamEndpoint, VideoConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Everything the console needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Rangefinder serial and power settings
    pub rangefinder: RangefinderConfig,
    /// Output size, frame rate and reconnect timing
    pub video: VideoConfig,
    /// Stream catalogue; the built-in list is used when empty
    pub streams: Vec<StreamEndpoint>,
    /// Cooldown between failed reconnect episodes
    pub reconnect: ReconnectPolicy,
    /// Failed reads tolerated on the current stream before failover
    pub retries_per_source: u32,
    /// Continuous polling switches itself off after this many minutes
    pub continuous_auto_off_minutes: f64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            rangefinder: RangefinderConfig::default(),
            video: VideoConfig::default(),
            streams: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            retries_per_source: 1,
            continuous_auto_off_minutes: 2.0,
        }
    }
}

impl ConsoleConfig {
    /// Load a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the console cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.video.fps.is_nan() || self.video.fps <= 0.0 {
            return Err(ConsoleError::config_error(format!(
                "fps must be positive, got {}",
                self.video.fps
            )));
        }
        if self.video.width == 0 || self.video.height == 0 {
            return Err(ConsoleError::config_error(format!(
                "frame size must be non-zero, got {}x{}",
                self.video.width, self.video.height
            )));
        }
        if self.rangefinder.baud_rate == 0 {
            return Err(ConsoleError::config_error("baud rate must be non-zero"));
        }
        if self.continuous_auto_off_minutes.is_nan() || self.continuous_auto_off_minutes < 0.0 {
            return Err(ConsoleError::config_error(
                "continuous_auto_off_minutes must not be negative",
            ));
        }
        Ok(())
    }

    /// Set the rangefinder settings.
    pub fn with_rangefinder(mut self, rangefinder: RangefinderConfig) -> Self {
        self.rangefinder = rangefinder;
        self
    }

    /// Set the video settings.
    pub fn with_video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }

    /// Set the stream catalogue.
    pub fn with_streams(mut self, streams: Vec<StreamEndpoint>) -> Self {
        self.streams = streams;
        self
    }

    /// Set the reconnect cooldown policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the per-stream retry budget.
    pub fn with_retries_per_source(mut self, retries: u32) -> Self {
        self.retries_per_source = retries;
        self
    }

    /// Set the continuous polling auto-off time.
    pub fn with_continuous_auto_off_minutes(mut self, minutes: f64) -> Self {
        self.continuous_auto_off_minutes = minutes;
        self
    }

    /// The catalogue the supervisor will use.
    pub fn effective_streams(&self) -> Vec<StreamEndpoint> {
        let streams = sanitize_streams(self.streams.clone());
        if streams.is_empty() {
            info!("No streams configured, using the built-in catalogue");
            return default_streams();
        }
        streams
    }

    pub fn continuous_auto_off(&self) -> Duration {
        Duration::from_secs_f64(self.continuous_auto_off_minutes.max(0.0) * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rangefinder::MeasureMode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.retries_per_source, 1);
        assert_eq!(config.continuous_auto_off(), Duration::from_secs(120));
        assert_eq!(config.effective_streams(), default_streams());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "rangefinder": { "port": "/dev/ttyUSB0", "mode": "continuous" },
            "streams": [ { "name": "yard", "url": "tcp://10.0.0.5:8888" } ],
            "reconnect": { "kind": "fixed", "interval_ms": 1000 }
        }"#;
        let config: ConsoleConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.rangefinder.port, "/dev/ttyUSB0");
        assert_eq!(config.rangefinder.mode, MeasureMode::Continuous);
        assert_eq!(config.rangefinder.baud_rate, 115200);
        assert_eq!(config.video, VideoConfig::default());
        assert_eq!(
            config.effective_streams(),
            vec![StreamEndpoint::new("yard", "tcp://10.0.0.5:8888")]
        );
        assert_eq!(config.reconnect, ReconnectPolicy::Fixed { interval_ms: 1000 });
    }

    #[test]
    fn test_invalid_streams_fall_back_to_defaults() {
        let config =
            ConsoleConfig::default().with_streams(vec![StreamEndpoint::new("", "http://x")]);
        assert_eq!(config.effective_streams(), default_streams());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ConsoleConfig::default().with_video(VideoConfig::default().with_fps(0.0));
        assert!(matches!(config.validate(), Err(ConsoleError::Config(_))));

        let config = ConsoleConfig::default().with_video(VideoConfig::default().with_size(0, 600));
        assert!(config.validate().is_err());

        let config = ConsoleConfig::default().with_continuous_auto_off_minutes(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("pi_rangecam_{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{ "retries_per_source": 3 }}"#).unwrap();
        drop(file);

        let config = ConsoleConfig::from_json_file(&path).unwrap();
        assert_eq!(config.retries_per_source, 3);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            ConsoleConfig::from_json_file(&path),
            Err(ConsoleError::Io(_))
        ));
    }
}
