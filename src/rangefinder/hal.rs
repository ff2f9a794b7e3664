//! Hardware capabilities used by the rangefinder driver.
//!
//! The link never touches GPIO or the UART directly. It talks to a
//! [`PowerLine`], a [`SerialChannel`] and a [`Delay`], so the codec and the
//! state machine run unchanged against scripted doubles (the `mock` module,
//! built for tests and under the `test-util` feature). GPIO access is
//! feature-gated to allow compilation on non-Raspberry Pi systems.

use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// The module's power-enable line.
pub trait PowerLine {
    /// Drive the enable line high (module powered).
    fn drive_high(&mut self);

    /// Drive the enable line low (module unpowered).
    fn drive_low(&mut self);
}

/// A byte channel with a bounded read timeout.
pub trait SerialChannel {
    /// Write the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Fill `buf` or give up when the read timeout expires.
    ///
    /// Returns the number of bytes actually read; fewer than `buf.len()`
    /// means the timeout expired.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard any bytes waiting in the receive buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Bytes already received and waiting in the receive buffer.
    fn bytes_available(&mut self) -> io::Result<usize>;
}

/// Blocking delays.
pub trait Delay {
    /// Block for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// UART channel on a real serial device (8-N-1, no flow control).
pub struct SerialPortChannel {
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
}

impl SerialPortChannel {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyAMA0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    /// * `read_timeout` - Upper bound for one [`SerialChannel::read_full`] call
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        tracing::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self { port, read_timeout })
    }
}

impl SerialChannel for SerialPortChannel {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }
}

#[cfg(feature = "gpio")]
mod raspberry_pi {
    use super::*;
    use crate::error::ConsoleError;
    use rppal::gpio::{Gpio, OutputPin};

    /// Enable line on a Raspberry Pi BCM pin, using rppal.
    pub struct GpioPowerLine {
        pin: OutputPin,
    }

    impl GpioPowerLine {
        /// Claim BCM `pin` as an output, initially low.
        pub fn new(pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| {
                ConsoleError::gpio_error(format!("Failed to initialize GPIO: {}", e))
            })?;

            let pin = gpio
                .get(pin)
                .map_err(|e| {
                    ConsoleError::gpio_error(format!("Failed to access pin {}: {}", pin, e))
                })?
                .into_output_low();

            Ok(Self { pin })
        }
    }

    impl PowerLine for GpioPowerLine {
        fn drive_high(&mut self) {
            self.pin.set_high();
        }

        fn drive_low(&mut self) {
            self.pin.set_low();
        }
    }
}

#[cfg(not(feature = "gpio"))]
mod fallback {
    use super::*;

    /// Enable line for systems without GPIO support.
    ///
    /// Logs level changes only; the module is assumed to be powered
    /// externally.
    pub struct LoggingPowerLine {
        pin: u8,
    }

    impl LoggingPowerLine {
        pub fn new(pin: u8) -> Result<Self> {
            tracing::warn!(
                "GPIO support not compiled in, enable pin {} will not be driven",
                pin
            );
            Ok(Self { pin })
        }
    }

    impl PowerLine for LoggingPowerLine {
        fn drive_high(&mut self) {
            tracing::debug!("enable pin {} -> high (no GPIO)", self.pin);
        }

        fn drive_low(&mut self) {
            tracing::debug!("enable pin {} -> low (no GPIO)", self.pin);
        }
    }
}

// Re-export the appropriate power line
#[cfg(feature = "gpio")]
pub use raspberry_pi::GpioPowerLine as DefaultPowerLine;

#[cfg(not(feature = "gpio"))]
pub use fallback::LoggingPowerLine as DefaultPowerLine;
