//! Raw request/response exchange with the rangefinder.
//!
//! [`RangefinderLink`] owns the serial channel and the power-enable line. It
//! sends one command per call and validates the answer, with no retries and
//! no state beyond a reading routed from the continuous-mode start
//! acknowledgement. Every exchange clears stale input before it writes.

use super::codec::{
    self, ResponseFrame, CMD_SINGLE, CMD_START_CONTINUOUS, CMD_STOP_CONTINUOUS, DEFAULT_PAYLOAD,
    FRAME_LEN,
};
use super::config::RangefinderConfig;
use super::hal::{Delay, DefaultPowerLine, PowerLine, SerialChannel, SerialPortChannel, StdDelay};
use super::measurement::Measurement;
use crate::error::{LinkError, ProtocolError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Frames inspected for the stop acknowledgement before giving up.
///
/// Measurement frames already in flight can precede the echo.
const STOP_ACK_SCAN_FRAMES: usize = 4;

/// Link to a rangefinder on real hardware.
pub type HardwareLink = RangefinderLink<SerialPortChannel, DefaultPowerLine, StdDelay>;

/// Serial channel plus power line for one rangefinder module.
pub struct RangefinderLink<S, P, D = StdDelay> {
    serial: S,
    power: P,
    delay: D,
    settle_delay: Duration,
    routed: Option<Measurement>,
}

impl HardwareLink {
    /// Open the UART and claim the enable pin described by `config`.
    pub fn open(config: &RangefinderConfig) -> Result<Self> {
        let serial = SerialPortChannel::open(&config.port, config.baud_rate, config.read_timeout())?;
        let power = DefaultPowerLine::new(config.enable_pin)?;
        info!(
            "Rangefinder link on {} with enable pin {}",
            config.port, config.enable_pin
        );
        Ok(Self::new(serial, power, StdDelay, config.settle_delay()))
    }
}

impl<S, P, D> RangefinderLink<S, P, D>
where
    S: SerialChannel,
    P: PowerLine,
    D: Delay,
{
    /// Assemble a link from its capabilities.
    pub fn new(serial: S, power: P, delay: D, settle_delay: Duration) -> Self {
        Self {
            serial,
            power,
            delay,
            settle_delay,
            routed: None,
        }
    }

    /// Drive the enable line high and wait for the module to settle.
    ///
    /// Commands must not be sent before this returns.
    pub fn power_on(&mut self) {
        debug!("Powering rangefinder on");
        self.power.drive_high();
        self.delay.delay(self.settle_delay);
    }

    /// Drive the enable line low. Safe in any state.
    pub fn power_off(&mut self) {
        debug!("Powering rangefinder off");
        self.power.drive_low();
        self.routed = None;
    }

    /// Take one single-shot measurement.
    pub fn send_single_shot(&mut self) -> std::result::Result<Measurement, LinkError> {
        self.serial.clear_input()?;
        self.send(CMD_SINGLE)?;
        let frame = codec::decode_response(&self.read_frame()?)?;
        measurement_from(&frame)
    }

    /// Put the device into continuous mode.
    ///
    /// The start acknowledgement is consumed here. If it already carries a
    /// successful reading, that reading is handed out by the next
    /// [`read_measurement`](Self::read_measurement).
    pub fn send_start_continuous(&mut self) -> std::result::Result<(), LinkError> {
        self.serial.clear_input()?;
        self.send(CMD_START_CONTINUOUS)?;
        let frame = codec::decode_response(&self.read_frame()?)?;

        self.routed = if frame.is_success() {
            Some(Measurement::from_raw(frame.distance_raw()))
        } else {
            None
        };
        debug!(
            "Continuous mode acknowledged (echo {:#04x}, status {:#04x})",
            frame.command, frame.status
        );
        Ok(())
    }

    /// Take the device out of continuous mode.
    ///
    /// Succeeds once a frame echoing the stop command arrives.
    pub fn send_stop_continuous(&mut self) -> std::result::Result<(), LinkError> {
        self.routed = None;
        self.serial.clear_input()?;
        self.send(CMD_STOP_CONTINUOUS)?;

        for _ in 0..STOP_ACK_SCAN_FRAMES {
            match codec::decode_response(&self.read_frame()?) {
                Ok(frame) if frame.command == CMD_STOP_CONTINUOUS => {
                    info!("Continuous mode stopped");
                    return Ok(());
                }
                Ok(frame) => debug!("Skipping frame {:#04x} while stopping", frame.command),
                Err(e) => debug!("Skipping malformed frame while stopping: {}", e),
            }
        }

        Err(LinkError::NoAcknowledgement {
            command: CMD_STOP_CONTINUOUS,
        })
    }

    /// Read one measurement frame emitted in continuous mode.
    pub fn read_measurement(&mut self) -> std::result::Result<Measurement, LinkError> {
        if let Some(reading) = self.routed.take() {
            return Ok(reading);
        }
        let frame = codec::decode_response(&self.read_frame()?)?;
        measurement_from(&frame)
    }

    /// The newest measurement available in continuous mode.
    ///
    /// Frames that piled up since the last read are drained and only the
    /// newest is decoded. With nothing buffered this is
    /// [`read_measurement`](Self::read_measurement): the routed start
    /// reading if there is one, otherwise the next frame to arrive.
    pub fn read_latest_measurement(&mut self) -> std::result::Result<Measurement, LinkError> {
        let mut newest = None;
        let mut skipped = 0usize;
        while self.serial.bytes_available()? >= FRAME_LEN {
            if newest.replace(self.read_frame()?).is_some() {
                skipped += 1;
            }
        }

        let Some(raw) = newest else {
            return self.read_measurement();
        };
        self.routed = None;
        if skipped > 0 {
            debug!("Dropped {} stale continuous frame(s)", skipped);
        }
        measurement_from(&codec::decode_response(&raw)?)
    }

    /// Check whether a module is wired and answering.
    ///
    /// Any 8-byte answer with the right header counts, even with a bad
    /// checksum. The module is always powered off afterwards.
    pub fn probe_availability(&mut self) -> bool {
        self.power_on();
        let result = self.probe_exchange();
        self.power_off();

        match result {
            Ok(frame) => {
                info!(
                    "Rangefinder answered probe (echo {:#04x}, status {:#04x})",
                    frame.command, frame.status
                );
                true
            }
            Err(e) => {
                warn!("Rangefinder probe failed: {}", e);
                false
            }
        }
    }

    fn probe_exchange(&mut self) -> std::result::Result<ResponseFrame, LinkError> {
        self.serial.clear_input()?;
        self.send(CMD_SINGLE)?;
        Ok(codec::decode_header_only(&self.read_frame()?)?)
    }

    fn send(&mut self, code: u8) -> std::result::Result<(), LinkError> {
        let frame = codec::encode_command(code, DEFAULT_PAYLOAD);
        self.serial.write_all(&frame)?;
        Ok(())
    }

    /// Read exactly one frame; nothing at all is a timeout, a partial frame a
    /// short read.
    fn read_frame(&mut self) -> std::result::Result<[u8; FRAME_LEN], LinkError> {
        let mut buf = [0u8; FRAME_LEN];
        match self.serial.read_full(&mut buf)? {
            0 => Err(LinkError::Timeout),
            n if n < FRAME_LEN => Err(ProtocolError::ShortRead { got: n }.into()),
            _ => Ok(buf),
        }
    }
}

fn measurement_from(frame: &ResponseFrame) -> std::result::Result<Measurement, LinkError> {
    if !frame.is_success() {
        return Err(LinkError::MeasurementFailed {
            status: frame.status,
        });
    }
    Ok(Measurement::from_raw(frame.distance_raw()))
}
