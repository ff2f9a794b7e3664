//! Failover across a catalogue of alternative video sources.
//!
//! The supervisor keeps one [`StreamSource`] active. When it keeps failing
//! past the per-source retry budget, a reconnect episode tries every
//! configured source exactly once, round-robin starting just after the
//! failing one, and stops at the first that delivers a frame. If none does,
//! the supervisor reports total failure, stays closed, and waits out a
//! cooldown from its [`ReconnectPolicy`] before the next episode.

use super::config::{ReconnectPolicy, StreamEndpoint, VideoConfig};
use super::decoder::{DecoderFactory, Image};
use super::source::{StreamConfig, StreamSource, StreamState};
use crate::status::{StatusBus, StatusEvent};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Supervises one active source out of a list of alternatives.
pub struct StreamSupervisor<F: DecoderFactory + Clone> {
    endpoints: Vec<StreamEndpoint>,
    video: VideoConfig,
    factory: F,
    policy: ReconnectPolicy,
    retries_per_source: u32,
    current: usize,
    source: Option<StreamSource<F>>,
    failures: u32,
    failed_episodes: u32,
    cooldown_until: Option<Instant>,
    status: Option<StatusBus>,
}

impl<F: DecoderFactory + Clone> StreamSupervisor<F> {
    /// Create a supervisor over `endpoints`. Nothing is opened until the
    /// first [`read`](Self::read).
    pub fn new(endpoints: Vec<StreamEndpoint>, video: VideoConfig, factory: F) -> Self {
        Self {
            endpoints,
            video,
            factory,
            policy: ReconnectPolicy::default(),
            retries_per_source: 1,
            current: 0,
            source: None,
            failures: 0,
            failed_episodes: 0,
            cooldown_until: None,
            status: None,
        }
    }

    /// Set the cooldown policy between failed episodes.
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set how many failed reads the current source gets before failover.
    pub fn with_retries_per_source(mut self, retries: u32) -> Self {
        self.retries_per_source = retries;
        self
    }

    /// Publish stream events on `bus`.
    pub fn with_status_bus(mut self, bus: StatusBus) -> Self {
        self.status = Some(bus);
        self
    }

    pub fn sources(&self) -> &[StreamEndpoint] {
        &self.endpoints
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Display name of the current source.
    pub fn current_source_name(&self) -> String {
        self.endpoints
            .get(self.current)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "no source".to_string())
    }

    /// Connection state of the active source.
    pub fn state(&self) -> StreamState {
        self.source
            .as_ref()
            .map(StreamSource::state)
            .unwrap_or(StreamState::Closed)
    }

    /// Read a frame from the active source, failing over when needed.
    pub fn read(&mut self) -> Option<Image> {
        if self.endpoints.is_empty() {
            return None;
        }
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return None;
            }
            self.cooldown_until = None;
        }
        if self.source.is_none() {
            self.activate(self.current);
        }

        if let Some(frame) = self.source.as_mut().and_then(StreamSource::read) {
            self.failures = 0;
            self.failed_episodes = 0;
            return Some(frame);
        }

        self.failures += 1;
        if self.failures <= self.retries_per_source {
            debug!(
                "Stream {} failed read {}/{}",
                self.current_source_name(),
                self.failures,
                self.retries_per_source
            );
            return None;
        }

        warn!("Stream {} unavailable", self.current_source_name());
        self.publish(StatusEvent::StreamUnavailable {
            name: self.current_source_name(),
        });
        self.reconnect_episode()
    }

    /// Make `index` the active source, releasing the previous one.
    ///
    /// Out-of-range indices are ignored and return `false`.
    pub fn switch_to(&mut self, index: usize) -> bool {
        if index >= self.endpoints.len() {
            warn!(
                "Stream index {} out of range ({} configured)",
                index,
                self.endpoints.len()
            );
            return false;
        }

        let from = self.current_source_name();
        self.activate(index);
        self.cooldown_until = None;
        self.failed_episodes = 0;
        info!("Switched stream {} -> {}", from, self.current_source_name());
        self.publish(StatusEvent::StreamSwitched {
            from,
            to: self.current_source_name(),
        });
        true
    }

    /// Release the active source. The next `read` reopens it.
    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }

    /// Try each source once, starting after the current one and ending with
    /// it.
    fn reconnect_episode(&mut self) -> Option<Image> {
        let start = self.current;
        let from = self.current_source_name();
        let count = self.endpoints.len();

        for step in 1..=count {
            let index = (start + step) % count;
            self.activate(index);
            info!(
                "Trying stream {} ({}/{})",
                self.current_source_name(),
                step,
                count
            );

            let Some(source) = self.source.as_mut() else {
                continue;
            };
            if !source.is_open() {
                continue;
            }
            if let Some(frame) = source.read() {
                self.failed_episodes = 0;
                self.publish(StatusEvent::StreamSwitched {
                    from,
                    to: self.current_source_name(),
                });
                return Some(frame);
            }
        }

        self.release();
        self.failed_episodes += 1;
        let cooldown = self.policy.cooldown(self.failed_episodes);
        self.cooldown_until = Some(Instant::now() + cooldown);
        warn!(
            "All {} streams failed, next attempt in {:?}",
            count, cooldown
        );
        self.publish(StatusEvent::AllStreamsFailed { attempted: count });
        None
    }

    fn activate(&mut self, index: usize) {
        self.release();
        self.current = index;
        self.failures = 0;

        let config = StreamConfig::new(self.endpoints[index].url.clone(), &self.video);
        let mut source = StreamSource::new(config, self.factory.clone());
        source.open();
        self.source = Some(source);
    }

    fn publish(&self, event: StatusEvent) {
        if let Some(bus) = &self.status {
            bus.publish(event);
        }
    }
}
