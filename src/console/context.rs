//! The console's owned application context.
//!
//! One [`ConsoleContext`] owns the rangefinder session, the stream
//! supervisor and the status bus. The display loop calls [`tick`] once per
//! frame; button handlers call the request methods. Nothing here is global.
//!
//! [`tick`]: ConsoleContext::tick

use super::config::ConsoleConfig;
use crate::rangefinder::{
    Delay, DefaultPowerLine, HardwareSession, Measurement, PowerLine, RangefinderSession,
    SerialChannel, SerialPortChannel, SessionState, StdDelay,
};
use crate::status::{StatusBus, StatusEvent};
use crate::stream::{DecoderFactory, Image, MjpegFactory, StreamState, StreamSupervisor};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Console over real hardware and MJPEG streams.
pub type HardwareConsole = ConsoleContext<SerialPortChannel, DefaultPowerLine, StdDelay, MjpegFactory>;

/// What the HUD shows for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HudSnapshot {
    pub timestamp: DateTime<Local>,
    pub distance_text: String,
    pub rangefinder: SessionState,
    pub continuous: bool,
    /// Seconds until continuous polling switches itself off
    pub continuous_remaining_secs: Option<f64>,
    pub stream_name: String,
    pub stream_state: StreamState,
}

/// One display-loop iteration.
#[derive(Debug)]
pub struct Tick {
    /// The next frame, if the stream delivered one
    pub frame: Option<Image>,
    pub hud: HudSnapshot,
}

/// HUD text for a reading.
pub fn distance_text(reading: Option<&Measurement>) -> String {
    match reading {
        Some(m) => format!("Distance: {}", m),
        None => "Distance: N/A".to_string(),
    }
}

pub struct ConsoleContext<S, P, D, F>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
    F: DecoderFactory + Clone,
{
    session: RangefinderSession<S, P, D>,
    supervisor: StreamSupervisor<F>,
    bus: StatusBus,
    auto_off: Duration,
    continuous_since: Option<Instant>,
    last_reading: Option<Measurement>,
}

impl HardwareConsole {
    /// Open the hardware and streams described by `config` and bring the
    /// rangefinder up.
    pub fn open(config: &ConsoleConfig) -> Self {
        let session = HardwareSession::open(&config.rangefinder);
        let mut console = Self::new(session, MjpegFactory::new(), config);
        console.startup();
        console
    }
}

impl<S, P, D, F> ConsoleContext<S, P, D, F>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
    F: DecoderFactory + Clone,
{
    /// Assemble a context. The session and supervisor are wired to a fresh
    /// status bus.
    pub fn new(session: RangefinderSession<S, P, D>, factory: F, config: &ConsoleConfig) -> Self {
        let bus = StatusBus::new();
        let supervisor = StreamSupervisor::new(config.effective_streams(), config.video.clone(), factory)
            .with_policy(config.reconnect)
            .with_retries_per_source(config.retries_per_source)
            .with_status_bus(bus.clone());

        Self {
            session: session.with_status_bus(bus.clone()),
            supervisor,
            bus,
            auto_off: config.continuous_auto_off(),
            continuous_since: None,
            last_reading: None,
        }
    }

    /// Probe the rangefinder and power it on if it answers.
    pub fn startup(&mut self) -> bool {
        if !self.session.probe() {
            warn!("Rangefinder not detected, distance readings disabled");
            return false;
        }
        match self.session.power_on() {
            Ok(()) => {
                info!("Rangefinder ready ({})", self.session.state());
                true
            }
            Err(e) => {
                warn!("Rangefinder power-on failed: {}", e);
                false
            }
        }
    }

    pub fn status_bus(&self) -> &StatusBus {
        &self.bus
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.bus.subscribe()
    }

    pub fn session(&self) -> &RangefinderSession<S, P, D> {
        &self.session
    }

    pub fn supervisor(&self) -> &StreamSupervisor<F> {
        &self.supervisor
    }

    pub fn last_reading(&self) -> Option<Measurement> {
        self.last_reading
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous_since.is_some()
    }

    /// One display-loop iteration: poll the rangefinder if continuous
    /// polling is on, then read the next frame.
    pub fn tick(&mut self) -> Tick {
        if let Some(since) = self.continuous_since {
            let elapsed = since.elapsed();
            if elapsed >= self.auto_off {
                self.continuous_since = None;
                let after_minutes = elapsed.as_secs_f64() / 60.0;
                info!("Continuous measuring switched off after {:.1} min", after_minutes);
                self.bus.publish(StatusEvent::ContinuousAutoOff { after_minutes });
            } else {
                self.last_reading = self.session.get_single_measurement();
            }
        }

        let frame = self.supervisor.read();
        Tick {
            frame,
            hud: self.hud(),
        }
    }

    /// Take one reading now. Cancels continuous polling.
    pub fn request_single_measurement(&mut self) -> Option<Measurement> {
        if self.continuous_since.take().is_some() {
            info!("Continuous measuring cancelled by single measurement");
        }
        self.last_reading = self.session.get_single_measurement();
        self.last_reading
    }

    /// Switch continuous polling on or off. Returns the new setting.
    pub fn toggle_continuous(&mut self) -> bool {
        if self.continuous_since.take().is_some() {
            info!("Continuous measuring off");
            return false;
        }
        if !self.session.is_available() {
            warn!("Continuous measuring unavailable: rangefinder {}", self.session.state());
            return false;
        }
        info!(
            "Continuous measuring on for {:.1} min",
            self.auto_off.as_secs_f64() / 60.0
        );
        self.continuous_since = Some(Instant::now());
        true
    }

    /// Make stream `index` active.
    pub fn switch_stream(&mut self, index: usize) -> bool {
        self.supervisor.switch_to(index)
    }

    /// Advance to the next stream in the catalogue.
    pub fn next_stream(&mut self) -> bool {
        let count = self.supervisor.sources().len();
        if count == 0 {
            return false;
        }
        self.supervisor
            .switch_to((self.supervisor.current_index() + 1) % count)
    }

    /// The HUD contents right now.
    pub fn hud(&self) -> HudSnapshot {
        let continuous_remaining_secs = self
            .continuous_since
            .map(|since| self.auto_off.saturating_sub(since.elapsed()).as_secs_f64());

        HudSnapshot {
            timestamp: Local::now(),
            distance_text: distance_text(self.last_reading.as_ref()),
            rangefinder: self.session.state(),
            continuous: self.continuous_since.is_some(),
            continuous_remaining_secs,
            stream_name: self.supervisor.current_source_name(),
            stream_state: self.supervisor.state(),
        }
    }

    /// Power down the rangefinder and release the stream.
    pub fn shutdown(&mut self) {
        self.continuous_since = None;
        self.session.close();
        self.supervisor.release();
        info!("Console shut down");
    }
}
