//! Experiment orchestration: timed scan cycles with flash markers.
//!
//! The orchestrator owns one motor and one flash controller outright (no
//! process-wide instruments) and drives them from a single control thread
//! with blocking calls throughout. A run is: optional limit calibration,
//! return to the scan origin, then repeated scan cycles until the
//! configured wall-clock duration elapses or the cancellation token fires.
//!
//! A stall on either leg is logged with the stall position, the device
//! error code is cleared, and the run continues with the next leg; one bad
//! scan does not forfeit the rest of the timed window.

use crate::cancel::CancelToken;
use crate::error::{Result, ScanError};
use crate::flash::Flash;
use crate::motor::{Direction, Motor};
use crate::transport::LineTransport;
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Encoder counts per centimetre of cart travel.
pub const COUNTS_PER_CM: i64 = 800;

/// Per-run settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ExperimentOptions {
    /// Re-run limit calibration before the first scan.
    pub reset_coordinates: bool,
    /// Scan toward the upstream end (encoder origin) when true.
    pub scan_upstream: bool,
    /// Cart speed during a scan, in encoder counts/s.
    pub scan_speed: i64,
    /// Cart speed on the return leg, in encoder counts/s.
    pub return_speed: i64,
    /// Fire one flash before each scan.
    pub start_flash: bool,
    /// Fire the double-flash end marker after each scan.
    pub end_flash: bool,
    /// Settings store location.
    pub settings_path: PathBuf,
    /// Limit store location.
    pub limit_path: PathBuf,
}

/// What happened during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Completed scan cycles.
    pub scans: u32,
    /// Stalls recovered from across all legs.
    pub stalls: u32,
    /// True when the run ended on cancellation rather than the clock.
    pub cancelled: bool,
}

/// Orchestrates one motor and one flash controller.
pub struct Experiment<M: LineTransport, F: LineTransport> {
    motor: Motor<M>,
    flash: Flash<F>,
    options: ExperimentOptions,
    cancel: CancelToken,
}

impl<M: LineTransport, F: LineTransport> Experiment<M, F> {
    /// Takes ownership of both controllers and wires the shared
    /// cancellation token into the motor's busy-wait.
    pub fn new(mut motor: Motor<M>, flash: Flash<F>, options: ExperimentOptions) -> Self {
        let cancel = CancelToken::new();
        motor.set_cancel_token(cancel.clone());
        Self {
            motor,
            flash,
            options,
            cancel,
        }
    }

    /// A clone of the run's cancellation token, for signal handlers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn scan_direction(&self) -> Direction {
        if self.options.scan_upstream {
            Direction::Origin
        } else {
            Direction::Limit
        }
    }

    /// Brings the motor to the Idle state: settings reconciliation, then
    /// either a fresh calibration (reset-coordinates flag) or the persisted
    /// limit, falling back to calibration when the limit store is absent.
    pub fn prepare(&mut self) -> Result<()> {
        self.motor.load_settings(&self.options.settings_path)?;

        if self.options.reset_coordinates {
            self.motor.calibrate_limits(&self.options.limit_path)?;
        } else {
            match self.motor.load_limit(&self.options.limit_path) {
                Ok(_) => {}
                Err(ScanError::Config(reason)) => {
                    warn!("No usable travel limit ({}); calibrating instead", reason);
                    self.motor.calibrate_limits(&self.options.limit_path)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One move leg with stall recovery: a stall is logged, the device
    /// error is cleared, and the leg counts as done. Returns whether the
    /// leg stalled.
    fn leg(&mut self, direction: Direction, speed: i64, label: &str) -> Result<bool> {
        match self.motor.move_to(direction, speed) {
            Ok(()) => Ok(false),
            Err(ScanError::Stall { code, position }) => {
                warn!(
                    "Stalled on {} at position {} (error code {})",
                    label, position, code
                );
                self.motor.clear_error()?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// One scan leg, with the configured flashes.
    pub fn scan(&mut self) -> Result<bool> {
        if self.options.start_flash {
            self.flash.fire()?;
        }
        let stalled = self.leg(self.scan_direction(), self.options.scan_speed, "scan")?;
        if self.options.end_flash {
            self.flash.double_flash()?;
        }
        Ok(stalled)
    }

    /// Returns the cart to the scan origin at the return speed.
    pub fn to_scan_origin(&mut self) -> Result<bool> {
        self.leg(
            self.scan_direction().reverse(),
            self.options.return_speed,
            "return to origin",
        )
    }

    /// Runs scan cycles until `duration` of wall-clock time has elapsed or
    /// the run is cancelled. The cart is returned to the scan origin
    /// before the first scan and after every scan.
    pub fn run(&mut self, duration: Duration) -> Result<RunReport> {
        let mut report = RunReport::default();

        if !Self::absorb(&mut report, self.to_scan_origin())? {
            return Ok(report);
        }

        let start = Instant::now();
        while start.elapsed() < duration {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            info!("Starting scan {}", report.scans + 1);
            if !Self::absorb(&mut report, self.scan())? {
                break;
            }
            if !Self::absorb(&mut report, self.to_scan_origin())? {
                break;
            }
            report.scans += 1;
        }

        info!(
            "Run finished: {} scans, {} stalls{}",
            report.scans,
            report.stalls,
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }

    /// Folds one leg outcome into the report. A cancellation that surfaced
    /// inside a blocked leg ends the run cleanly (`Ok(false)`) rather than
    /// as an error.
    fn absorb(report: &mut RunReport, outcome: Result<bool>) -> Result<bool> {
        match outcome {
            Ok(stalled) => {
                report.stalls += u32::from(stalled);
                Ok(true)
            }
            Err(ScanError::Cancelled) => {
                report.cancelled = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Closes both controllers. Idempotent.
    pub fn close(&mut self) {
        self.motor.close();
        self.flash.close();
    }
}
