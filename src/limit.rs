//! Limit store: the last-calibrated travel extent on disk.
//!
//! Format:
//!
//! ```text
//! 86400
//!
//! calibrated 2018-05-29 14:03:12
//! ```
//!
//! Only the first line (the encoder count of the far travel limit) is
//! machine-read; everything after the blank line is a human-readable
//! calibration record.

use crate::error::{Result, ScanError};
use chrono::Local;
use std::fs;
use std::path::Path;

/// Reads the persisted travel limit from `path`.
///
/// Fails with `ScanError::Config` if the file is absent or its first line
/// is not an integer; callers may fall back to a fresh calibration.
pub fn load(path: &Path) -> Result<i64> {
    let text = fs::read_to_string(path).map_err(|e| {
        ScanError::Config(format!("cannot read limit file {}: {}", path.display(), e))
    })?;
    let first = text.lines().next().unwrap_or("").trim();
    first.parse::<i64>().map_err(|_| {
        ScanError::Config(format!(
            "limit file {}: first line '{}' is not an integer",
            path.display(),
            first
        ))
    })
}

/// Persists a freshly calibrated travel limit with a timestamp.
pub fn store(path: &Path, counts: i64) -> Result<()> {
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    fs::write(path, format!("{}\n\ncalibrated {}\n", counts, stamp))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stores_and_reloads_the_limit() {
        let dir = tempdir().expect("tempdir failed");
        let path = dir.path().join("xlim.txt");

        store(&path, 86400).expect("store failed");
        assert_eq!(load(&path).expect("load failed"), 86400);

        let text = std::fs::read_to_string(&path).expect("read failed");
        assert!(text.contains("calibrated "));
    }

    #[test]
    fn only_the_first_line_is_machine_read() {
        let dir = tempdir().expect("tempdir failed");
        let path = dir.path().join("xlim.txt");
        std::fs::write(&path, "42000\n\nhand-edited note\nsecond note\n").expect("write failed");

        assert_eq!(load(&path).expect("load failed"), 42000);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempdir().expect("tempdir failed");
        let err = load(&dir.path().join("absent.txt")).expect_err("load should fail");
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn garbage_first_line_is_a_config_error() {
        let dir = tempdir().expect("tempdir failed");
        let path = dir.path().join("xlim.txt");
        std::fs::write(&path, "not-a-number\n").expect("write failed");

        let err = load(&path).expect_err("load should fail");
        assert!(err.to_string().contains("not an integer"));
    }
}
