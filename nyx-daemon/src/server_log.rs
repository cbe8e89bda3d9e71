#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use nyx_control::logging::{level_rank, Logging};
use parking_lot::Mutex;

use crate::errors::Result;

/// Per-server log written under the server's own data directory.
///
/// Line format: `<rfc3339> <LEVEL> <component>: <message>`. With an empty file
/// name the lines go to `tracing` instead.
pub struct ServerLog {
    component: String,
    max_rank: usize,
    disabled: bool,
    file: Option<Mutex<File>>,
}

impl ServerLog {
    pub fn open(data_dir: &Path, logging: &Logging, component: impl Into<String>) -> Result<Self> {
        let file = if logging.disable || logging.file.is_empty() {
            None
        } else {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(data_dir.join(&logging.file))?;
            Some(Mutex::new(f))
        };
        Ok(Self {
            component: component.into(),
            max_rank: logging.rank(),
            disabled: logging.disable,
            file,
        })
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write("ERROR", msg.as_ref());
    }

    pub fn warning(&self, msg: impl AsRef<str>) {
        self.write("WARNING", msg.as_ref());
    }

    pub fn notice(&self, msg: impl AsRef<str>) {
        self.write("NOTICE", msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write("INFO", msg.as_ref());
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.write("DEBUG", msg.as_ref());
    }

    fn write(&self, level: &str, msg: &str) {
        if self.disabled || level_rank(level).map_or(true, |r| r > self.max_rank) {
            return;
        }
        match &self.file {
            Some(f) => {
                let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                let mut f = f.lock();
                // A failed log write must not take the server down.
                let _ = writeln!(f, "{ts} {level} {}: {msg}", self.component);
            }
            None => tracing::info!(component = %self.component, level, "{msg}"),
        }
    }
}
