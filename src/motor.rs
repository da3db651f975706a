//! MDrive stepper-motor linear actuator driver.
//!
//! Drives the flume cart over a 9600-baud serial link using the MDrive's
//! line-oriented MCode vocabulary:
//!
//! - `PR <var>` / `PR AL`: print one variable / dump all variables
//! - `<VAR> <value>`: set a variable
//! - `MA <pos>` / `MR <dist>`: move absolute / relative (encoder counts)
//! - `SL <speed>`: slew at a signed speed until stopped
//! - `HM 3`: home to the home switch
//!
//! Variables of interest: `VM` (max velocity), `P` (encoder position), `MV`
//! (motion-in-progress flag), `ER` (error code).
//!
//! ## State machine
//!
//! `Disconnected → Connected → Configured → Idle ↔ Moving/Homing/Calibrating`
//!
//! `load_settings` takes the controller from Connected to Configured by
//! reconciling the live variable snapshot against the settings profile.
//! Knowing the travel limit (`load_limit` or `calibrate_limits`) reaches
//! Idle, from which bounded moves are allowed. Normal operation keeps the
//! cart inside `0 ..= xlim`; the hardware limit switches, not software,
//! enforce that range.

use crate::cancel::CancelToken;
use crate::error::{Result, ScanError};
use crate::limit;
use crate::settings::{parse_variable_line, SettingsProfile};
use crate::transport::{LineTransport, SerialTransport};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

const VAR_VELOCITY: &str = "VM";
const VAR_POSITION: &str = "P";
const VAR_MOVING: &str = "MV";
const VAR_ERROR: &str = "ER";

/// Direction of a bounded move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the near end of travel (encoder position 0).
    Origin,
    /// Toward the far end of travel (the calibrated limit).
    Limit,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Origin => Direction::Limit,
            Direction::Limit => Direction::Origin,
        }
    }
}

/// Switch selector used during calibration. A closed enum, so an invalid
/// selector cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// The limit switch at the near end of travel.
    LimitMinus,
    /// The dedicated home switch.
    Home,
    /// The limit switch at the far end of travel.
    LimitPlus,
}

/// Controller state, tracked to reject out-of-order operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    /// Transport released.
    Disconnected,
    /// Transport open, settings not yet reconciled.
    Connected,
    /// Settings reconciled, travel limit not yet known.
    Configured,
    /// Ready for bounded moves.
    Idle,
    /// A move is in progress.
    Moving,
    /// Calibration: seeking the near reference.
    Homing,
    /// Calibration: measuring the far extent.
    Calibrating,
}

impl MotorState {
    fn name(self) -> &'static str {
        match self {
            MotorState::Disconnected => "disconnected",
            MotorState::Connected => "unconfigured",
            MotorState::Configured => "configured",
            MotorState::Idle => "idle",
            MotorState::Moving => "moving",
            MotorState::Homing => "homing",
            MotorState::Calibrating => "calibrating",
        }
    }
}

/// Tuning knobs for the motor driver.
#[derive(Debug, Clone)]
pub struct MotorOptions {
    /// Serial baud rate.
    pub baud: u32,
    /// Read timeout for drain-style reads off the port.
    pub read_timeout: Duration,
    /// Delay between sending a query and reading the device's reply, long
    /// enough for the MDrive to flush a full `PR AL` dump.
    pub settle_delay: Duration,
    /// Interval between motion-flag polls in `wait`.
    pub poll_interval: Duration,
    /// Upper bound on one `wait`; exceeding it is `ScanError::Timeout`.
    pub wait_timeout: Duration,
    /// Slew speed (counts/s) used to seek limit switches during calibration.
    pub calibration_speed: i64,
    /// Distance (counts) of the nudge that backs the cart off a limit
    /// switch during calibration.
    pub nudge_counts: i64,
}

impl Default for MotorOptions {
    fn default() -> Self {
        Self {
            baud: 9600,
            read_timeout: Duration::from_millis(50),
            settle_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(120),
            calibration_speed: 8000,
            nudge_counts: 800,
        }
    }
}

impl MotorOptions {
    /// Options with all delays collapsed, for scripted-transport tests.
    pub fn instant() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            wait_timeout: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Driver for an MDrive-class linear actuator.
pub struct Motor<T: LineTransport> {
    transport: Option<T>,
    options: MotorOptions,
    state: MotorState,
    profile: Option<SettingsProfile>,
    xlim: Option<i64>,
    last_error_code: Option<i64>,
    cancel: CancelToken,
}

impl Motor<SerialTransport> {
    /// Opens the motor's serial port and waits for the device to settle.
    pub fn open(port: &str, options: MotorOptions) -> Result<Self> {
        info!("Opening motor port {} at {} baud", port, options.baud);
        let transport = SerialTransport::open(port, options.baud, options.read_timeout)?;
        sleep(options.settle_delay);
        Ok(Self::with_transport(transport, options))
    }
}

impl<T: LineTransport> Motor<T> {
    /// Wraps an already-open transport. Used directly by tests with a
    /// scripted transport.
    pub fn with_transport(transport: T, options: MotorOptions) -> Self {
        Self {
            transport: Some(transport),
            options,
            state: MotorState::Connected,
            profile: None,
            xlim: None,
            last_error_code: None,
            cancel: CancelToken::new(),
        }
    }

    /// Installs a cancellation token observed by `wait`.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    /// Current controller state.
    pub fn state(&self) -> MotorState {
        self.state
    }

    /// The travel limit in working state, once loaded or calibrated.
    pub fn travel_limit(&self) -> Option<i64> {
        self.xlim
    }

    /// Device error code recorded after the most recent move, if any.
    pub fn last_error_code(&self) -> Option<i64> {
        self.last_error_code
    }

    /// The settings profile loaded by `load_settings`, if any.
    pub fn settings_profile(&self) -> Option<&SettingsProfile> {
        self.profile.as_ref()
    }

    fn transport(&mut self) -> Result<&mut T> {
        self.transport.as_mut().ok_or_else(|| {
            ScanError::Connection(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "motor connection closed",
            ))
        })
    }

    /// Sends one MCode command line.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.transport()?.write_line(command)
    }

    /// Drains the device output buffer.
    pub fn read_output(&mut self) -> Result<Vec<String>> {
        self.transport()?.read_lines()
    }

    /// Sets one device variable.
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        debug!("Setting motor variable {} = {}", name, value);
        self.send_command(&format!("{} {}", name, value))
    }

    /// Queries the full variable snapshot via `PR AL`.
    ///
    /// Waits the settle delay for the device to flush the whole dump, then
    /// parses every line but the final echoed one as a name/value pair.
    /// The snapshot is stale the moment it is returned.
    pub fn read_variables(&mut self) -> Result<BTreeMap<String, String>> {
        self.transport()?.clear_input()?;
        self.send_command("PR AL")?;
        sleep(self.options.settle_delay);

        let mut lines = self.read_output()?;
        lines.pop(); // final line is the echoed prompt, not a variable

        let mut snapshot = BTreeMap::new();
        for line in lines {
            if let Some((name, value)) = parse_variable_line(&line) {
                snapshot.insert(name, value);
            }
        }
        Ok(snapshot)
    }

    /// Queries a single device variable.
    ///
    /// Pending input is flushed first so a stale dump cannot masquerade as
    /// the reply; the last returned line carries the value. Replies in the
    /// echoed `NAME = VALUE` form are unwrapped to the bare value.
    pub fn read_variable(&mut self, name: &str) -> Result<String> {
        self.transport()?.clear_input()?;
        self.send_command(&format!("PR {}", name))?;
        sleep(self.options.settle_delay);

        let lines = self.read_output()?;
        let last = lines
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ScanError::Protocol(format!("no reply to PR {}", name)))?;

        match parse_variable_line(last) {
            Some((echoed, value)) if echoed == name => Ok(value),
            _ => Ok(last.trim().to_string()),
        }
    }

    fn read_int(&mut self, name: &str) -> Result<i64> {
        let value = self.read_variable(name)?;
        value.parse::<i64>().map_err(|_| {
            ScanError::Protocol(format!("variable {} reply '{}' is not an integer", name, value))
        })
    }

    /// Reads the current encoder position.
    pub fn position(&mut self) -> Result<i64> {
        self.read_int(VAR_POSITION)
    }

    /// Clears the device error code after a stall has been handled.
    pub fn clear_error(&mut self) -> Result<()> {
        self.set_variable(VAR_ERROR, "0")?;
        self.last_error_code = Some(0);
        Ok(())
    }

    /// Reconciles the live device configuration against the settings file.
    ///
    /// Every profile key whose live value differs is pushed to the device
    /// with one set-variable command; matching keys are left alone.
    pub fn load_settings(&mut self, path: &Path) -> Result<()> {
        let live = self.read_variables()?;
        let profile = SettingsProfile::load(path)?;

        let mut pushed = 0;
        for (name, wanted) in profile.iter() {
            if live.get(name).map(String::as_str) != Some(wanted) {
                self.set_variable(name, wanted)?;
                pushed += 1;
            }
        }
        info!(
            "Motor settings reconciled: {} of {} variables pushed",
            pushed,
            profile.len()
        );

        self.profile = Some(profile);
        if self.state == MotorState::Connected {
            self.state = MotorState::Configured;
        }
        Ok(())
    }

    /// Loads the persisted travel limit into working state.
    ///
    /// Fails with `ScanError::Config` when the limit store is absent; the
    /// caller may fall back to `calibrate_limits`.
    pub fn load_limit(&mut self, path: &Path) -> Result<i64> {
        let xlim = limit::load(path)?;
        info!("Loaded travel limit: {} counts", xlim);
        self.xlim = Some(xlim);
        if self.state == MotorState::Configured {
            self.state = MotorState::Idle;
        }
        Ok(xlim)
    }

    /// Issues the command that seeks the given switch. The caller waits for
    /// motion to complete.
    pub fn seek_switch(&mut self, switch: Switch) -> Result<()> {
        match switch {
            Switch::LimitMinus => {
                self.send_command(&format!("SL -{}", self.options.calibration_speed))
            }
            Switch::LimitPlus => {
                self.send_command(&format!("SL {}", self.options.calibration_speed))
            }
            Switch::Home => self.send_command("HM 3"),
        }
    }

    /// Measures the physical travel range and persists it to the limit
    /// store at `path`.
    ///
    /// Sequence: seek the limit-minus switch, nudge forward off it, zero
    /// the position counter, seek the limit-plus switch, nudge back off it,
    /// and read the resulting position as the new limit. A stall or timeout
    /// mid-sequence aborts; a zero or negative measurement fails with
    /// `ScanError::Calibration` and persists nothing.
    pub fn calibrate_limits(&mut self, path: &Path) -> Result<i64> {
        match self.state {
            MotorState::Configured | MotorState::Idle => {}
            other => {
                return Err(ScanError::State {
                    op: "calibrate",
                    state: other.name(),
                })
            }
        }

        let result = self.run_calibration(path);
        match &result {
            Ok(xlim) => {
                self.state = MotorState::Idle;
                info!("Calibration complete: travel limit {} counts", xlim);
            }
            Err(e) => {
                self.state = MotorState::Configured;
                warn!("Calibration aborted: {}", e);
            }
        }
        result
    }

    fn run_calibration(&mut self, path: &Path) -> Result<i64> {
        let nudge = self.options.nudge_counts;

        self.state = MotorState::Homing;
        info!("Calibrating: seeking limit-minus switch");
        self.seek_switch(Switch::LimitMinus)?;
        self.wait()?;
        self.send_command(&format!("MR {}", nudge))?;
        self.wait()?;
        self.set_variable(VAR_POSITION, "0")?;

        self.state = MotorState::Calibrating;
        info!("Calibrating: seeking limit-plus switch");
        self.seek_switch(Switch::LimitPlus)?;
        self.wait()?;
        self.send_command(&format!("MR -{}", nudge))?;
        self.wait()?;

        let measured = self.read_int(VAR_POSITION)?;
        if measured <= 0 {
            return Err(ScanError::Calibration(format!(
                "measured travel limit {} counts is implausible",
                measured
            )));
        }

        limit::store(path, measured)?;
        self.xlim = Some(measured);
        Ok(measured)
    }

    /// Moves the cart to one end of its travel at the given speed
    /// (counts/s) and blocks until motion completes.
    ///
    /// Returns `ScanError::Stall` when the device reports a nonzero error
    /// code afterwards; the caller may inspect `last_error_code`, call
    /// `clear_error`, and continue.
    pub fn move_to(&mut self, direction: Direction, speed: i64) -> Result<()> {
        if self.state != MotorState::Idle {
            return Err(ScanError::State {
                op: "move",
                state: self.state.name(),
            });
        }
        let target = match direction {
            Direction::Origin => 0,
            Direction::Limit => self.xlim.ok_or(ScanError::State {
                op: "move to the travel limit",
                state: "uncalibrated",
            })?,
        };

        self.set_variable(VAR_VELOCITY, &speed.to_string())?;
        debug!("Moving to {} at {} counts/s", target, speed);
        self.state = MotorState::Moving;
        let moved = self
            .send_command(&format!("MA {}", target))
            .and_then(|_| self.wait());
        self.state = MotorState::Idle;
        moved?;

        let code = self.read_int(VAR_ERROR)?;
        self.last_error_code = Some(code);
        if code != 0 {
            let position = self.read_int(VAR_POSITION).unwrap_or(-1);
            return Err(ScanError::Stall { code, position });
        }
        Ok(())
    }

    /// One scan leg out and one back: a move to the far extent of the
    /// requested direction at `scan_speed`, then a move back at
    /// `return_speed`. Assumes the cart starts at the opposite extent;
    /// that is the caller's responsibility.
    pub fn scan(&mut self, direction: Direction, scan_speed: i64, return_speed: i64) -> Result<()> {
        self.move_to(direction, scan_speed)?;
        self.move_to(direction.reverse(), return_speed)
    }

    /// Blocks until the motion-in-progress flag reads 0.
    ///
    /// Polls `MV` at the configured interval, bounded by the configured
    /// timeout; exceeding it is `ScanError::Timeout`, and an external
    /// cancellation is `ScanError::Cancelled`. Never hangs.
    pub fn wait(&mut self) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if self.read_int(VAR_MOVING)? == 0 {
                return Ok(());
            }
            if start.elapsed() >= self.options.wait_timeout {
                return Err(ScanError::Timeout {
                    what: "motion to complete".to_string(),
                    waited: start.elapsed(),
                });
            }
            sleep(self.options.poll_interval);
        }
    }

    /// Releases the transport. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Motor connection closed");
        }
        self.state = MotorState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn idle_motor(mock: MockTransport, xlim: i64) -> Motor<MockTransport> {
        let mut motor = Motor::with_transport(mock, MotorOptions::instant());
        motor.state = MotorState::Idle;
        motor.xlim = Some(xlim);
        motor
    }

    #[test]
    fn move_to_limit_targets_xlim() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 0"]);
        mock.respond("PR ER", &["ER 0"]);
        let log = mock.log();
        let mut motor = idle_motor(mock, 86400);

        motor.move_to(Direction::Limit, 4000).expect("move failed");
        assert!(log.contains("VM 4000"));
        assert!(log.contains("MA 86400"));
    }

    #[test]
    fn move_to_origin_targets_zero() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 0"]);
        mock.respond("PR ER", &["ER 0"]);
        let log = mock.log();
        let mut motor = idle_motor(mock, 86400);

        motor.move_to(Direction::Origin, 2400).expect("move failed");
        assert!(log.contains("MA 0"));
    }

    #[test]
    fn move_reports_stall_with_code_and_position() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 0"]);
        mock.respond("PR ER", &["ER 86"]);
        mock.respond("PR P", &["P 51200"]);
        let mut motor = idle_motor(mock, 86400);

        let err = motor
            .move_to(Direction::Limit, 4000)
            .expect_err("move should stall");
        match err {
            ScanError::Stall { code, position } => {
                assert_eq!(code, 86);
                assert_eq!(position, 51200);
            }
            other => panic!("expected stall, got {}", other),
        }
        assert_eq!(motor.last_error_code(), Some(86));
    }

    #[test]
    fn scan_is_one_leg_out_and_one_back() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 0"]);
        mock.respond("PR ER", &["ER 0"]);
        let log = mock.log();
        let mut motor = idle_motor(mock, 86400);

        motor.scan(Direction::Limit, 2400, 8000).expect("scan failed");
        let moves = log.with_prefix("MA ");
        assert_eq!(moves, vec!["MA 86400".to_string(), "MA 0".to_string()]);
        assert_eq!(log.with_prefix("VM "), vec!["VM 2400", "VM 8000"]);
    }

    #[test]
    fn move_refused_before_limit_is_known() {
        let mut motor = Motor::with_transport(MockTransport::new(), MotorOptions::instant());
        motor.state = MotorState::Idle;

        let err = motor
            .move_to(Direction::Limit, 4000)
            .expect_err("move should be refused");
        assert!(matches!(err, ScanError::State { .. }));
    }

    #[test]
    fn wait_returns_when_motion_flag_clears() {
        let mut mock = MockTransport::new();
        mock.respond_once("PR MV", &["MV 1"]);
        mock.respond_once("PR MV", &["MV 1"]);
        mock.respond("PR MV", &["MV 0"]);
        let log = mock.log();
        let mut motor = Motor::with_transport(
            mock,
            MotorOptions {
                wait_timeout: Duration::from_secs(5),
                ..MotorOptions::instant()
            },
        );

        motor.wait().expect("wait failed");
        assert_eq!(log.with_prefix("PR MV").len(), 3);
    }

    #[test]
    fn wait_times_out_against_a_never_idle_device() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 1"]);
        let mut motor = Motor::with_transport(mock, MotorOptions::instant());

        let err = motor.wait().expect_err("wait should time out");
        assert!(matches!(err, ScanError::Timeout { .. }));
    }

    #[test]
    fn wait_observes_cancellation() {
        let mut mock = MockTransport::new();
        mock.respond("PR MV", &["MV 1"]);
        let mut motor = Motor::with_transport(mock, MotorOptions::instant());
        let token = CancelToken::new();
        motor.set_cancel_token(token.clone());
        token.cancel();

        let err = motor.wait().expect_err("wait should be cancelled");
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[test]
    fn read_variable_takes_last_line_and_unwraps_echo() {
        let mut mock = MockTransport::new();
        mock.respond("PR P", &["stale noise", "P = 1200"]);
        let mut motor = Motor::with_transport(mock, MotorOptions::instant());

        assert_eq!(motor.read_variable("P").expect("read failed"), "1200");
    }

    #[test]
    fn read_variable_accepts_bare_values() {
        let mut mock = MockTransport::new();
        mock.respond("PR P", &["1200"]);
        let mut motor = Motor::with_transport(mock, MotorOptions::instant());

        assert_eq!(motor.read_variable("P").expect("read failed"), "1200");
    }

    #[test]
    fn close_is_idempotent() {
        let mut motor = Motor::with_transport(MockTransport::new(), MotorOptions::instant());
        motor.close();
        motor.close();
        assert_eq!(motor.state(), MotorState::Disconnected);
        assert!(motor.send_command("PR P").is_err());
    }
}
