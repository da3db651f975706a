//! # flume-scan
//!
//! Instrument control for a sediment-flume bed scanner: an MDrive-class
//! stepper-motor linear actuator carrying a camera cart, and a Numato
//! USB-GPIO board pulsing the camera flash. An orchestrator alternates
//! scans and flashes for a fixed wall-clock duration.
//!
//! Everything is single-threaded and synchronous: each device interaction
//! is a blocking write / settle / read round-trip on a serial line that the
//! owning controller holds exclusively.
//!
//! ## Crate structure
//!
//! - **`transport`**: the `LineTransport` contract for CR/LF-framed text
//!   channels, and `SerialTransport` on top of `serialport`.
//! - **`motor`**: the motor controller state machine — settings
//!   reconciliation, limit-switch calibration, bounded moves with a
//!   busy-flag poll.
//! - **`flash`**: the GPIO flash pulse driver.
//! - **`experiment`**: the orchestrator composing the two controllers into
//!   timed scan cycles.
//! - **`settings`** / **`limit`**: the flat-file stores for the target
//!   motor configuration and the calibrated travel limit.
//! - **`config`**: TOML run configuration.
//! - **`cancel`**: the shared cancellation token checked inside busy-waits.
//! - **`mock`**: a scripted transport for tests.
//! - **`error`**: the `ScanError` taxonomy.

pub mod cancel;
pub mod config;
pub mod error;
pub mod experiment;
pub mod flash;
pub mod limit;
pub mod mock;
pub mod motor;
pub mod settings;
pub mod transport;

pub use cancel::CancelToken;
pub use error::{Result, ScanError};
pub use experiment::{Experiment, ExperimentOptions, RunReport};
pub use flash::{Flash, FlashOptions};
pub use motor::{Direction, Motor, MotorOptions, MotorState, Switch};
pub use settings::SettingsProfile;
pub use transport::{LineTransport, SerialTransport};
