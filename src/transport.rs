//! Line-oriented serial transport.
//!
//! Both instruments in this crate (the MDrive motor and the Numato GPIO
//! board) speak newline-framed ASCII over a serial link: a command is a
//! mnemonic plus optional arguments terminated by CR/LF, and every response
//! line arrives with the same two framing characters on the end.
//!
//! `LineTransport` captures that contract so the drivers can be exercised
//! against a scripted transport in tests; `SerialTransport` is the real
//! implementation on top of the `serialport` crate.

use crate::error::Result;
use log::trace;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// A bidirectional line-oriented text channel to a device.
pub trait LineTransport {
    /// Sends one command line, appending the CR/LF terminator.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Drains the receive buffer and returns the complete lines currently
    /// available, each stripped of its trailing framing characters.
    fn read_lines(&mut self) -> Result<Vec<String>>;

    /// Discards any pending input so the next read starts clean.
    fn clear_input(&mut self) -> Result<()>;
}

/// Splits a raw receive buffer into framed lines.
///
/// Lines are delimited by `\n`; a trailing `\r` (the other half of the CR/LF
/// frame) is stripped from each. An unterminated tail fragment is kept as a
/// final line so slow devices do not silently lose output.
pub fn split_framed(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = raw
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();
    if raw.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// `LineTransport` over a physical serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Opens `path` at `baud` with the given read timeout.
    ///
    /// The motor channel is polled rather than blocked on, so its timeout is
    /// kept short; drain-style reads treat a timed-out read as end of the
    /// currently buffered output.
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(read_timeout)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        Ok(Self {
            port,
            name: path.to_string(),
        })
    }
}

impl LineTransport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let framed = format!("{}\r\n", line);
        trace!("{} <- '{}'", self.name, line);
        self.port.write_all(framed.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut raw = String::new();
        let mut buffer = [0u8; 1024];
        loop {
            match self.port.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => raw.push_str(&String::from_utf8_lossy(&buffer[..n])),
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        let lines = split_framed(&raw);
        for line in &lines {
            trace!("{} -> '{}'", self.name, line);
        }
        Ok(lines)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_framed_strips_crlf_pairs() {
        let lines = split_framed("VM = 4000\r\nP = 0\r\n");
        assert_eq!(lines, vec!["VM = 4000", "P = 0"]);
    }

    #[test]
    fn split_framed_keeps_unterminated_tail() {
        let lines = split_framed("ER = 0\r\n86");
        assert_eq!(lines, vec!["ER = 0", "86"]);
    }

    #[test]
    fn split_framed_empty_buffer() {
        assert!(split_framed("").is_empty());
    }
}
