//! Run configuration.
//!
//! A run is configured from `config/<name>.toml` (default `config/default`):
//!
//! ```toml
//! motor_port = "/dev/ttyUSB0"
//! flash_port = "/dev/ttyUSB1"
//! duration = "10m"
//! scan_upstream = true
//! scan_speed_cm_s = 3.0
//! return_speed_cm_s = 10.0
//! ```
//!
//! Speeds are given in cm/s of cart travel and converted to encoder counts
//! for the motor. There are no CLI flags; everything lives in the file.

use crate::error::{Result, ScanError};
use crate::experiment::{ExperimentOptions, COUNTS_PER_CM};
use config::Config;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_scan_speed() -> f64 {
    3.0
}

fn default_return_speed() -> f64 {
    10.0
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("config/motor_settings.txt")
}

fn default_limit_file() -> PathBuf {
    PathBuf::from("config/xlim.txt")
}

/// One experiment run, as described by the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Log filter applied when the binary initialises logging.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Motor serial port path.
    pub motor_port: String,
    /// Flash trigger serial port path.
    pub flash_port: String,
    /// Wall-clock length of the run (humantime form, e.g. `"10m"`).
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Re-run limit calibration before scanning.
    #[serde(default)]
    pub reset_coordinates: bool,
    /// Scan toward the upstream (origin) end.
    #[serde(default = "default_true")]
    pub scan_upstream: bool,
    /// Scan speed in cm/s of cart travel.
    #[serde(default = "default_scan_speed")]
    pub scan_speed_cm_s: f64,
    /// Return speed in cm/s of cart travel.
    #[serde(default = "default_return_speed")]
    pub return_speed_cm_s: f64,
    /// Fire one flash before each scan.
    #[serde(default = "default_true")]
    pub start_flash: bool,
    /// Fire the double-flash end marker after each scan.
    #[serde(default = "default_true")]
    pub end_flash: bool,
    /// Settings store location.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
    /// Limit store location.
    #[serde(default = "default_limit_file")]
    pub limit_file: PathBuf,
}

impl RunConfig {
    /// Loads `config/<name>` (default `config/default`), any format the
    /// `config` crate recognises.
    pub fn new(config_name: Option<&str>) -> Result<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(|e| ScanError::Config(e.to_string()))?;
        s.try_deserialize()
            .map_err(|e| ScanError::Config(e.to_string()))
    }

    /// The orchestrator options this run implies, with cm/s speeds
    /// converted to encoder counts/s.
    pub fn experiment_options(&self) -> ExperimentOptions {
        ExperimentOptions {
            reset_coordinates: self.reset_coordinates,
            scan_upstream: self.scan_upstream,
            scan_speed: (self.scan_speed_cm_s * COUNTS_PER_CM as f64) as i64,
            return_speed: (self.return_speed_cm_s * COUNTS_PER_CM as f64) as i64,
            start_flash: self.start_flash,
            end_flash: self.end_flash,
            settings_path: self.settings_file.clone(),
            limit_path: self.limit_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(text: &str) -> RunConfig {
        Config::builder()
            .add_source(config::File::from_str(text, FileFormat::Toml))
            .build()
            .expect("build failed")
            .try_deserialize()
            .expect("deserialize failed")
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = from_toml(
            r#"
            motor_port = "/dev/ttyUSB0"
            flash_port = "/dev/ttyUSB1"
            duration = "60s"
            "#,
        );
        assert_eq!(cfg.duration, Duration::from_secs(60));
        assert!(cfg.scan_upstream);
        assert!(!cfg.reset_coordinates);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn speeds_convert_to_encoder_counts() {
        let cfg = from_toml(
            r#"
            motor_port = "COM3"
            flash_port = "COM6"
            duration = "1m"
            scan_speed_cm_s = 3.0
            return_speed_cm_s = 10.0
            "#,
        );
        let options = cfg.experiment_options();
        assert_eq!(options.scan_speed, 2400);
        assert_eq!(options.return_speed, 8000);
    }
}
