use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Level names understood by every server, most to least severe.
pub const LEVELS: [&str; 5] = ["ERROR", "WARNING", "NOTICE", "INFO", "DEBUG"];

/// Per-server logging section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Logging {
    /// Suppress all log output.
    #[serde(default)]
    pub disable: bool,
    /// Log file name relative to the data directory; empty means stdout.
    #[serde(default)]
    pub file: String,
    /// One of [`LEVELS`], case-insensitive.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "NOTICE".to_string()
}

impl Default for Logging {
    fn default() -> Self {
        Self { disable: false, file: String::new(), level: default_level() }
    }
}

impl Logging {
    pub fn to_file(file: impl Into<String>, level: impl Into<String>) -> Self {
        Self { disable: false, file: file.into(), level: level.into() }
    }

    pub fn fixup(&mut self) {
        if self.level.trim().is_empty() {
            self.level = default_level();
        }
        self.level = self.level.trim().to_ascii_uppercase();
    }

    pub fn validate(&self) -> Result<()> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(Error::invalid(format!("invalid logging level: {}", self.level)));
        }
        if self.file.contains('/') || self.file.contains('\\') {
            return Err(Error::invalid(format!(
                "log file must be a bare file name inside the data dir: {}",
                self.file
            )));
        }
        Ok(())
    }

    /// Severity rank of the configured level; 0 is ERROR.
    pub fn rank(&self) -> usize {
        level_rank(&self.level).unwrap_or(2)
    }
}

pub fn level_rank(level: &str) -> Option<usize> {
    LEVELS.iter().position(|l| l.eq_ignore_ascii_case(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_normalises_level() -> Result<()> {
        let mut l = Logging::to_file("nyx.log", " debug ");
        l.fixup();
        l.validate()?;
        assert_eq!(l.level, "DEBUG");
        assert_eq!(l.rank(), 4);
        Ok(())
    }

    #[test]
    fn rejects_paths_and_unknown_levels() {
        let mut l = Logging::to_file("../escape.log", "DEBUG");
        l.fixup();
        assert!(l.validate().is_err());
        let mut l = Logging::to_file("nyx.log", "LOUD");
        l.fixup();
        assert!(l.validate().is_err());
    }
}
