//! Settings store: the target motor configuration on disk.
//!
//! The settings file is plain text, one variable per line, in the device's
//! own echo format:
//!
//! ```text
//! VM = 768000
//! A = 40000
//! D = 40000
//! ```
//!
//! The separator is the fixed 3-character ` = ` the MDrive uses when it
//! prints variables, so a captured `PR AL` dump can be pasted straight into
//! the file. Parsing tokenizes on whitespace runs rather than character
//! offsets, so minor formatting drift is tolerated.

use crate::error::{Result, ScanError};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Splits one `NAME = VALUE` (or `NAME VALUE`) line into a pair.
///
/// The name is the first whitespace-delimited token; a lone `=` token after
/// it is treated as the separator and skipped. Returns `None` when no value
/// remains, including blank lines.
pub fn parse_variable_line(line: &str) -> Option<(String, String)> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let mut rest: Vec<&str> = tokens.collect();
    if rest.first() == Some(&"=") {
        rest.remove(0);
    }
    if rest.is_empty() {
        return None;
    }
    Some((name.to_string(), rest.join(" ")))
}

/// Desired motor configuration, loaded once per session and immutable
/// thereafter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsProfile {
    values: BTreeMap<String, String>,
}

impl SettingsProfile {
    /// Builds a profile from name/value pairs. Test and tooling convenience;
    /// production sessions load from disk.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }

    /// Loads the profile from the settings file at `path`.
    ///
    /// Fails with `ScanError::Config` if the file is missing or any
    /// non-blank line has no recognizable name/value split.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("cannot read settings file {}: {}", path.display(), e))
        })?;

        let mut values = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = parse_variable_line(line).ok_or_else(|| {
                ScanError::Config(format!(
                    "settings file {} line {}: no NAME VALUE split in '{}'",
                    path.display(),
                    lineno + 1,
                    line
                ))
            })?;
            values.insert(name, value);
        }
        Ok(Self { values })
    }

    /// Writes the profile back out in the device echo format.
    pub fn store(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for (name, value) in &self.values {
            text.push_str(&format!("{} = {}\n", name, value));
        }
        fs::write(path, text)?;
        Ok(())
    }

    /// Desired value for `name`, if the profile defines one.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Iterates over the profile in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of variables in the profile.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the profile defines no variables.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_device_echo_format() {
        assert_eq!(
            parse_variable_line("VM = 768000"),
            Some(("VM".to_string(), "768000".to_string()))
        );
    }

    #[test]
    fn tolerates_separator_drift() {
        // Tokenizer contract: first whitespace run splits, offsets do not.
        assert_eq!(
            parse_variable_line("VM   768000"),
            Some(("VM".to_string(), "768000".to_string()))
        );
        assert_eq!(
            parse_variable_line("VM =  768000"),
            Some(("VM".to_string(), "768000".to_string()))
        );
    }

    #[test]
    fn rejects_lines_without_a_value() {
        assert_eq!(parse_variable_line("VM"), None);
        assert_eq!(parse_variable_line("VM ="), None);
        assert_eq!(parse_variable_line("   "), None);
    }

    #[test]
    fn load_fails_on_malformed_line() {
        let dir = tempdir().expect("tempdir failed");
        let path = dir.path().join("motor_settings.txt");
        std::fs::write(&path, "VM = 768000\nJUNK\n").expect("write failed");

        let err = SettingsProfile::load(&path).expect_err("load should fail");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn load_fails_on_missing_file() {
        let dir = tempdir().expect("tempdir failed");
        let err = SettingsProfile::load(&dir.path().join("absent.txt"))
            .expect_err("load should fail");
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn profile_round_trips_through_store_format() {
        let dir = tempdir().expect("tempdir failed");
        let path = dir.path().join("motor_settings.txt");

        let profile =
            SettingsProfile::from_pairs([("VM", "768000"), ("A", "40000"), ("D", "40000")]);
        profile.store(&path).expect("store failed");

        let reloaded = SettingsProfile::load(&path).expect("load failed");
        assert_eq!(reloaded, profile);
    }
}
