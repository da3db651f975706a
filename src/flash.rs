//! Numato USB-GPIO camera-flash trigger driver.
//!
//! The flash is wired to GPIO line 0 of an 8-channel Numato board on its
//! own serial channel (19200 baud, 1 s timeout). Firing is a single pulse:
//! `gpio set 0` followed immediately by `gpio clear 0`, so the pulse width
//! is whatever the transport latency gives — no explicit timing.
//!
//! The board powers up in an unknown state, so `open` writes one `gpio
//! clear 0` after the settling delay to guarantee a known-low idle line.

use crate::error::Result;
use crate::transport::{LineTransport, SerialTransport};
use log::{debug, info};
use std::thread::sleep;
use std::time::Duration;

const CMD_SET: &str = "gpio set 0";
const CMD_CLEAR: &str = "gpio clear 0";

/// Tuning knobs for the flash driver.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Serial baud rate.
    pub baud: u32,
    /// Read/write timeout on the GPIO board's channel.
    pub read_timeout: Duration,
    /// Delay after opening before the defensive clear write.
    pub settle_delay: Duration,
    /// Pause between the two fires of a double flash.
    pub double_flash_pause: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            baud: 19200,
            read_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
            double_flash_pause: Duration::from_secs(2),
        }
    }
}

impl FlashOptions {
    /// Options with all delays collapsed, for scripted-transport tests.
    pub fn instant() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            double_flash_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Driver for the GPIO flash trigger.
pub struct Flash<T: LineTransport> {
    transport: Option<T>,
    options: FlashOptions,
}

impl Flash<SerialTransport> {
    /// Opens the GPIO board's serial port and drives the line to a known
    /// low idle state.
    pub fn open(port: &str, options: FlashOptions) -> Result<Self> {
        info!("Opening flash port {} at {} baud", port, options.baud);
        let transport = SerialTransport::open(port, options.baud, options.read_timeout)?;
        let mut flash = Self {
            transport: Some(transport),
            options,
        };
        sleep(flash.options.settle_delay);
        flash.write(CMD_CLEAR)?;
        Ok(flash)
    }
}

impl<T: LineTransport> Flash<T> {
    /// Wraps an already-open transport without the defensive clear. Used
    /// directly by tests with a scripted transport.
    pub fn with_transport(transport: T, options: FlashOptions) -> Self {
        Self {
            transport: Some(transport),
            options,
        }
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.transport
            .as_mut()
            .ok_or_else(|| {
                crate::error::ScanError::Connection(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "flash connection closed",
                ))
            })?
            .write_line(command)
    }

    /// Fires one pulse.
    pub fn fire(&mut self) -> Result<()> {
        debug!("Flash fire");
        self.write(CMD_SET)?;
        self.write(CMD_CLEAR)
    }

    /// Fires twice with the configured pause between. Used as the
    /// end-of-run marker on the camera footage.
    pub fn double_flash(&mut self) -> Result<()> {
        self.fire()?;
        sleep(self.options.double_flash_pause);
        self.fire()
    }

    /// Releases the transport. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Flash connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn fire_pulses_set_then_clear() {
        let mock = MockTransport::new();
        let log = mock.log();
        let mut flash = Flash::with_transport(mock, FlashOptions::instant());
        flash.fire().expect("fire failed");

        assert_eq!(
            log.commands(),
            vec!["gpio set 0".to_string(), "gpio clear 0".to_string()]
        );
    }

    #[test]
    fn double_flash_is_two_pulses() {
        let mock = MockTransport::new();
        let log = mock.log();
        let mut flash = Flash::with_transport(mock, FlashOptions::instant());
        flash.double_flash().expect("double flash failed");

        let sent = log.commands();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], "gpio set 0");
        assert_eq!(sent[3], "gpio clear 0");
    }

    #[test]
    fn close_is_idempotent() {
        let mut flash = Flash::with_transport(MockTransport::new(), FlashOptions::instant());
        flash.close();
        flash.close();
        assert!(flash.fire().is_err());
    }
}
