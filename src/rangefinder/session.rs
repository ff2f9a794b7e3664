//! Power and measurement state machine for one rangefinder module.
//!
//! ```text
//! PoweredOff --power_on()--> PoweringUp --settle--> Idle
//! Idle --start_continuous()--> ContinuousActive --stop_continuous()--> Idle
//! Idle | ContinuousActive --power_off()--> PoweredOff
//! any --probe() fails every attempt--> Unavailable
//! ```
//!
//! Construction never aborts the process: if the serial port or enable pin
//! cannot be opened the session starts out [`SessionState::Unavailable`] and
//! every measurement operation degrades to "no reading".

use super::config::{MeasureMode, RangefinderConfig};
use super::hal::{Delay, DefaultPowerLine, PowerLine, SerialChannel, SerialPortChannel, StdDelay};
use super::link::{HardwareLink, RangefinderLink};
use super::measurement::Measurement;
use crate::error::LinkError;
use crate::status::{StatusBus, StatusEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Session over real hardware.
pub type HardwareSession = RangefinderSession<SerialPortChannel, DefaultPowerLine, StdDelay>;

/// Lifecycle state of a [`RangefinderSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    PoweredOff,
    PoweringUp,
    Idle,
    ContinuousActive,
    Unavailable,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::PoweredOff => "powered off",
            SessionState::PoweringUp => "powering up",
            SessionState::Idle => "idle",
            SessionState::ContinuousActive => "in continuous mode",
            SessionState::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// The rangefinder state machine, owning its link exclusively.
pub struct RangefinderSession<S, P, D = StdDelay>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    link: Option<RangefinderLink<S, P, D>>,
    state: SessionState,
    mode: MeasureMode,
    probe_attempts: u32,
    status: Option<StatusBus>,
}

impl HardwareSession {
    /// Open the hardware described by `config`.
    ///
    /// Failure to open the port or claim the pin yields an unavailable
    /// session rather than an error.
    pub fn open(config: &RangefinderConfig) -> Self {
        match HardwareLink::open(config) {
            Ok(link) => Self::new(link, config),
            Err(e) => {
                error!(
                    "Rangefinder on {} could not be opened: {}. Measurements disabled.",
                    config.port, e
                );
                Self::unavailable(config)
            }
        }
    }
}

impl<S, P, D> RangefinderSession<S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    /// Wrap an opened link. The session starts powered off.
    pub fn new(link: RangefinderLink<S, P, D>, config: &RangefinderConfig) -> Self {
        Self {
            link: Some(link),
            state: SessionState::PoweredOff,
            mode: config.mode,
            probe_attempts: config.probe_attempts.max(1),
            status: None,
        }
    }

    /// A session with no hardware behind it.
    pub fn unavailable(config: &RangefinderConfig) -> Self {
        Self {
            link: None,
            state: SessionState::Unavailable,
            mode: config.mode,
            probe_attempts: config.probe_attempts.max(1),
            status: None,
        }
    }

    /// Publish state changes and failures on `bus`.
    pub fn with_status_bus(mut self, bus: StatusBus) -> Self {
        self.status = Some(bus);
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Mode entered on power-up.
    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    /// Whether measurements can be attempted at all.
    pub fn is_available(&self) -> bool {
        self.state != SessionState::Unavailable
    }

    /// Whether the module is currently powered.
    pub fn is_powered(&self) -> bool {
        matches!(
            self.state,
            SessionState::PoweringUp | SessionState::Idle | SessionState::ContinuousActive
        )
    }

    /// Power the module and wait for it to settle.
    ///
    /// In [`MeasureMode::Continuous`] continuous mode is started right away;
    /// if that fails the session stays `Idle` and the error is returned.
    pub fn power_on(&mut self) -> Result<(), LinkError> {
        match self.state {
            SessionState::Unavailable => return Err(LinkError::DeviceUnavailable),
            SessionState::Idle | SessionState::ContinuousActive => return Ok(()),
            SessionState::PoweredOff | SessionState::PoweringUp => {}
        }
        if self.link.is_none() {
            return Err(LinkError::DeviceUnavailable);
        }

        self.transition(SessionState::PoweringUp);
        if let Some(link) = self.link.as_mut() {
            link.power_on();
        }
        self.transition(SessionState::Idle);

        if self.mode == MeasureMode::Continuous {
            info!("Starting continuous mode on power-up");
            self.start_continuous()?;
        }
        Ok(())
    }

    /// Cut power. Safe in any state; an unavailable session stays
    /// unavailable.
    pub fn power_off(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.power_off();
        }
        if self.state != SessionState::Unavailable {
            self.transition(SessionState::PoweredOff);
        }
    }

    /// Probe for the module, retrying up to the configured attempt count.
    ///
    /// Success clears a previous `Unavailable` and leaves the module
    /// powered off; failing every attempt makes the session `Unavailable`.
    pub fn probe(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            warn!("Rangefinder probe skipped: no serial port");
            return false;
        };

        if self.state == SessionState::ContinuousActive {
            if let Err(e) = link.send_stop_continuous() {
                debug!("Stopping continuous mode before probe failed: {}", e);
            }
        }

        let attempts = self.probe_attempts;
        let available = (1..=attempts).any(|attempt| {
            debug!("Probe attempt {}/{}", attempt, attempts);
            link.probe_availability()
        });

        if available {
            self.transition(SessionState::PoweredOff);
        } else {
            warn!("Rangefinder did not answer {} probe(s)", attempts);
            self.transition(SessionState::Unavailable);
        }
        available
    }

    /// One measurement, or `None` when there is no reading.
    ///
    /// In `Idle` this is a single-shot exchange; in `ContinuousActive` it
    /// returns the newest continuous-mode frame, dropping older ones still
    /// buffered. Any other state returns `None` without touching the device.
    pub fn get_single_measurement(&mut self) -> Option<Measurement> {
        let result = match (self.state, self.link.as_mut()) {
            (SessionState::Idle, Some(link)) => link.send_single_shot(),
            (SessionState::ContinuousActive, Some(link)) => link.read_latest_measurement(),
            (state, _) => {
                debug!("No measurement while {}", state);
                return None;
            }
        };
        self.reading_from(result)
    }

    /// Enter continuous mode. Only legal from `Idle`.
    pub fn start_continuous(&mut self) -> Result<(), LinkError> {
        let link = self.require(SessionState::Idle, "start continuous mode")?;
        link.send_start_continuous()?;
        self.transition(SessionState::ContinuousActive);
        Ok(())
    }

    /// Leave continuous mode. Only legal from `ContinuousActive`.
    ///
    /// The session returns to `Idle` even when the acknowledgement is
    /// missing, since no further frames will be consumed.
    pub fn stop_continuous(&mut self) -> Result<(), LinkError> {
        let link = self.require(SessionState::ContinuousActive, "stop continuous mode")?;
        let result = link.send_stop_continuous();
        self.transition(SessionState::Idle);
        result
    }

    /// The lazy sequence of continuous-mode readings.
    ///
    /// Each pull performs one read cycle. The sequence ends once the session
    /// leaves `ContinuousActive`; call [`start_continuous`](Self::start_continuous)
    /// again to restart it.
    pub fn continuous_stream(&mut self) -> ContinuousReadings<'_, S, P, D> {
        ContinuousReadings { session: self }
    }

    /// Power off and release the hardware.
    pub fn close(&mut self) {
        if self.state == SessionState::ContinuousActive {
            if let Err(e) = self.stop_continuous() {
                debug!("Stop before close failed: {}", e);
            }
        }
        self.power_off();
        self.link = None;
        info!("Rangefinder resources released");
    }

    /// Consume exactly one continuous-mode frame, oldest first.
    fn next_continuous_reading(&mut self) -> Option<Measurement> {
        let result = match (self.state, self.link.as_mut()) {
            (SessionState::ContinuousActive, Some(link)) => link.read_measurement(),
            _ => return None,
        };
        self.reading_from(result)
    }

    fn require(
        &mut self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<&mut RangefinderLink<S, P, D>, LinkError> {
        match (self.state, self.link.as_mut()) {
            (SessionState::Unavailable, _) | (_, None) => Err(LinkError::DeviceUnavailable),
            (state, Some(link)) if state == expected => Ok(link),
            (state, Some(_)) => Err(LinkError::NotReady { operation, state }),
        }
    }

    fn reading_from(&mut self, result: Result<Measurement, LinkError>) -> Option<Measurement> {
        match result {
            Ok(reading) => {
                debug!("Distance {}", reading);
                self.publish(StatusEvent::Measurement { reading });
                Some(reading)
            }
            Err(e) => {
                match &e {
                    LinkError::Timeout => warn!("Rangefinder measurement timed out"),
                    LinkError::Protocol(p) => warn!("Rangefinder sent a bad frame: {}", p),
                    LinkError::MeasurementFailed { status } => {
                        warn!("Rangefinder reported failure (status {:#04x})", status)
                    }
                    other => warn!("Rangefinder measurement error: {}", other),
                }
                self.publish(StatusEvent::NoReading {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Rangefinder {} -> {}", self.state, next);
            self.state = next;
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        self.publish(StatusEvent::RangefinderState { state: self.state });
    }

    fn publish(&self, event: StatusEvent) {
        if let Some(bus) = &self.status {
            bus.publish(event);
        }
    }
}

impl<S, P, D> Drop for RangefinderSession<S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    fn drop(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.power_off();
        }
    }
}

/// Continuous-mode readings, one read cycle per pull.
///
/// A malformed or failed cycle yields `Some(None)` and the sequence goes on;
/// the sequence itself ends (`None`) once the session is stopped or powered
/// off.
pub struct ContinuousReadings<'a, S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    session: &'a mut RangefinderSession<S, P, D>,
}

impl<S, P, D> ContinuousReadings<'_, S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    /// Stop continuous mode and end the sequence.
    pub fn stop(self) -> Result<(), LinkError> {
        self.session.stop_continuous()
    }

    /// Cut power and end the sequence.
    pub fn power_off(self) {
        self.session.power_off();
    }
}

impl<S, P, D> Iterator for ContinuousReadings<'_, S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    type Item = Option<Measurement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.session.state != SessionState::ContinuousActive {
            return None;
        }
        Some(self.session.next_continuous_reading())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rangefinder::codec::{
        CMD_SINGLE, CMD_START_CONTINUOUS, CMD_STOP_CONTINUOUS, STATUS_OK,
    };
    use crate::rangefinder::mock::{response_frame, MockPowerLine, RecordingDelay, ScriptedSerial};
    use std::time::Duration;

    type TestSession = RangefinderSession<ScriptedSerial, MockPowerLine, RecordingDelay>;

    fn session(config: &RangefinderConfig) -> (TestSession, ScriptedSerial, MockPowerLine) {
        let serial = ScriptedSerial::new();
        let power = MockPowerLine::new();
        let link = RangefinderLink::new(
            serial.clone(),
            power.clone(),
            RecordingDelay::new(),
            Duration::from_millis(300),
        );
        (RangefinderSession::new(link, config), serial, power)
    }

    #[test]
    fn test_starts_powered_off() {
        let (s, _, power) = session(&RangefinderConfig::default());
        assert_eq!(s.state(), SessionState::PoweredOff);
        assert!(s.is_available());
        assert!(power.history().is_empty());
    }

    #[test]
    fn test_power_cycle() {
        let (mut s, _, power) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(power.is_high());

        s.power_off();
        assert_eq!(s.state(), SessionState::PoweredOff);
        assert!(!power.is_high());
    }

    #[test]
    fn test_single_measurement_in_idle() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        serial.push_reply(response_frame(CMD_SINGLE, STATUS_OK, 350));
        serial.push_silence();

        assert_eq!(s.get_single_measurement().unwrap().raw_decimeters, 350);
        assert_eq!(s.get_single_measurement(), None);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_measurement_while_off_does_no_io() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        assert_eq!(s.get_single_measurement(), None);
        assert_eq!(serial.io_count(), 0);
    }

    #[test]
    fn test_start_continuous_requires_idle() {
        let (mut s, serial, power) = session(&RangefinderConfig::default());
        let err = s.start_continuous().unwrap_err();
        assert!(matches!(
            err,
            LinkError::NotReady {
                state: SessionState::PoweredOff,
                ..
            }
        ));
        assert_eq!(serial.io_count(), 0);
        assert!(!power.is_high());
    }

    #[test]
    fn test_stop_continuous_requires_continuous() {
        let (mut s, _, _) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        assert!(matches!(
            s.stop_continuous(),
            Err(LinkError::NotReady {
                state: SessionState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_continuous_stream_survives_bad_frames() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 100));
        s.start_continuous().unwrap();
        assert_eq!(s.state(), SessionState::ContinuousActive);

        let mut corrupt = response_frame(CMD_START_CONTINUOUS, STATUS_OK, 110);
        corrupt[7] ^= 0x55;
        serial.push_reply(corrupt);
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 120));

        let readings: Vec<_> = s
            .continuous_stream()
            .take(3)
            .map(|r| r.map(|m| m.raw_decimeters))
            .collect();
        assert_eq!(readings, vec![Some(100), None, Some(120)]);
        assert_eq!(s.state(), SessionState::ContinuousActive);
    }

    #[test]
    fn test_on_demand_reading_skips_stale_frames() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 100));
        s.start_continuous().unwrap();
        for raw in [200, 300, 400] {
            serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, raw));
        }

        assert_eq!(s.get_single_measurement(), Some(Measurement::from_raw(400)));
        assert_eq!(serial.pending_replies(), 0);
        assert_eq!(s.state(), SessionState::ContinuousActive);
    }

    #[test]
    fn test_stream_ends_when_stopped() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, 0x00, 0));
        s.start_continuous().unwrap();

        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 42));
        serial.push_reply(response_frame(CMD_STOP_CONTINUOUS, STATUS_OK, 0));

        let mut stream = s.continuous_stream();
        assert_eq!(stream.next().unwrap().unwrap().raw_decimeters, 42);
        stream.stop().unwrap();

        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.continuous_stream().next().is_none());
    }

    #[test]
    fn test_stream_ends_when_powered_off() {
        let (mut s, serial, power) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 10));
        s.start_continuous().unwrap();

        s.continuous_stream().power_off();
        assert_eq!(s.state(), SessionState::PoweredOff);
        assert!(!power.is_high());
        assert!(s.continuous_stream().next().is_none());
    }

    #[test]
    fn test_continuous_mode_starts_on_power_on() {
        let config = RangefinderConfig::default().with_mode(MeasureMode::Continuous);
        let (mut s, serial, _) = session(&config);
        serial.push_reply(response_frame(CMD_START_CONTINUOUS, STATUS_OK, 77));

        s.power_on().unwrap();
        assert_eq!(s.state(), SessionState::ContinuousActive);
        assert_eq!(serial.commands(), vec![CMD_START_CONTINUOUS]);
    }

    #[test]
    fn test_failed_probe_is_sticky() {
        let config = RangefinderConfig::default().with_probe_attempts(2);
        let (mut s, serial, power) = session(&config);
        serial.push_silence().push_silence();

        assert!(!s.probe());
        assert_eq!(s.state(), SessionState::Unavailable);
        assert_eq!(serial.commands(), vec![CMD_SINGLE, CMD_SINGLE]);
        assert!(!power.is_high());

        let io_before = serial.io_count();
        assert_eq!(s.get_single_measurement(), None);
        assert!(matches!(s.power_on(), Err(LinkError::DeviceUnavailable)));
        assert!(matches!(
            s.start_continuous(),
            Err(LinkError::DeviceUnavailable)
        ));
        assert_eq!(serial.io_count(), io_before);

        serial.push_reply(response_frame(CMD_SINGLE, STATUS_OK, 350));
        assert!(s.probe());
        assert_eq!(s.state(), SessionState::PoweredOff);
    }

    #[test]
    fn test_probe_retries_until_answer() {
        let (mut s, serial, _) = session(&RangefinderConfig::default());
        serial.push_silence();
        serial.push_reply(response_frame(CMD_SINGLE, STATUS_OK, 1));

        assert!(s.probe());
        assert_eq!(serial.commands().len(), 2);
        assert_eq!(s.state(), SessionState::PoweredOff);
    }

    #[test]
    fn test_unavailable_session_degrades() {
        let mut s: TestSession = RangefinderSession::unavailable(&RangefinderConfig::default());
        assert!(!s.is_available());
        assert!(!s.probe());
        assert_eq!(s.get_single_measurement(), None);
        s.power_off();
        assert_eq!(s.state(), SessionState::Unavailable);
    }

    #[test]
    fn test_close_releases_link() {
        let (mut s, serial, power) = session(&RangefinderConfig::default());
        s.power_on().unwrap();
        s.close();
        assert!(!power.is_high());
        assert!(!s.probe());
        assert_eq!(serial.io_count(), 0);
    }

    #[test]
    fn test_status_events_published() {
        let bus = StatusBus::new();
        let mut rx = bus.subscribe();
        let (s, serial, _) = session(&RangefinderConfig::default());
        let mut s = s.with_status_bus(bus);
        serial.push_reply(response_frame(CMD_SINGLE, STATUS_OK, 350));

        s.power_on().unwrap();
        s.get_single_measurement();

        let kinds: Vec<StatusEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            kinds,
            vec![
                StatusEvent::RangefinderState {
                    state: SessionState::PoweringUp
                },
                StatusEvent::RangefinderState {
                    state: SessionState::Idle
                },
                StatusEvent::Measurement {
                    reading: Measurement::from_raw(350)
                },
            ]
        );
    }
}
