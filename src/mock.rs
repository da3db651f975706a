//! Scripted transport for testing without physical hardware.
//!
//! `MockTransport` plays the device side of the line protocol: each command
//! written to it is recorded, and any scripted response lines become
//! available on the next read. Unit and integration tests drive the motor
//! and flash controllers against it; a `CommandLog` handle kept before
//! handing the transport over lets a test inspect traffic afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut mock = MockTransport::new();
//! mock.respond("PR MV", &["MV = 0"]);
//! let log = mock.log();
//! let mut motor = Motor::with_transport(mock, MotorOptions::instant());
//! // ... drive the motor, then assert on log.commands()
//! ```

use crate::error::Result;
use crate::transport::LineTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Shared, ordered record of every command line written to a mock.
#[derive(Clone, Debug, Default)]
pub struct CommandLog {
    commands: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    fn push(&self, command: &str) {
        self.lock().push(command.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All commands written so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Commands written so far that start with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// True if `command` was written at least once.
    pub fn contains(&self, command: &str) -> bool {
        self.lock().iter().any(|c| c == command)
    }
}

/// In-memory `LineTransport` with scripted responses and a command log.
#[derive(Default)]
pub struct MockTransport {
    /// One-shot responses, consumed front-to-back per command.
    scripted: HashMap<String, VecDeque<Vec<String>>>,
    /// Repeating responses, used when no one-shot response is queued.
    repeating: HashMap<String, Vec<String>>,
    /// Every command line written, in order.
    log: CommandLog,
    /// Device output waiting to be read.
    pending: Vec<String>,
    /// Number of `clear_input` calls observed.
    clears: usize,
}

impl MockTransport {
    /// Creates an empty mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a repeating response: every write of `command` makes `lines`
    /// available for the next read.
    pub fn respond(&mut self, command: &str, lines: &[&str]) {
        self.repeating.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Scripts a one-shot response consumed ahead of any repeating response
    /// for the same command. Queueing several builds a sequence.
    pub fn respond_once(&mut self, command: &str, lines: &[&str]) {
        self.scripted
            .entry(command.to_string())
            .or_default()
            .push_back(lines.iter().map(|l| l.to_string()).collect());
    }

    /// A handle onto the command log, valid after the transport is handed
    /// to a controller.
    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Number of times the input buffer was flushed.
    pub fn clear_count(&self) -> usize {
        self.clears
    }
}

impl LineTransport for MockTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.log.push(line);
        let response = match self.scripted.get_mut(line).and_then(|q| q.pop_front()) {
            Some(lines) => Some(lines),
            None => self.repeating.get(line).cloned(),
        };
        if let Some(lines) = response {
            self.pending.extend(lines);
        }
        Ok(())
    }

    fn read_lines(&mut self) -> Result<Vec<String>> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_and_replays_responses() {
        let mut mock = MockTransport::new();
        mock.respond("PR P", &["P = 1200"]);
        let log = mock.log();

        mock.write_line("PR P").expect("write failed");
        assert_eq!(mock.read_lines().expect("read failed"), vec!["P = 1200"]);
        assert_eq!(log.commands(), vec!["PR P".to_string()]);
    }

    #[test]
    fn one_shot_responses_run_before_repeating() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV = 0"]);
        mock.respond_once("PR MV", &["MV = 1"]);

        mock.write_line("PR MV").expect("write failed");
        assert_eq!(mock.read_lines().expect("read failed"), vec!["MV = 1"]);
        mock.write_line("PR MV").expect("write failed");
        assert_eq!(mock.read_lines().expect("read failed"), vec!["MV = 0"]);
    }

    #[test]
    fn clear_input_drops_pending_output() {
        let mut mock = MockTransport::new();
        mock.respond("PR ER", &["ER = 0"]);
        mock.write_line("PR ER").expect("write failed");
        mock.clear_input().expect("clear failed");
        assert!(mock.read_lines().expect("read failed").is_empty());
        assert_eq!(mock.clear_count(), 1);
    }
}
