use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Harness log, written next to the server data dirs.
pub const LOG_FILE: &str = "kimchi.log";

/// Install the global subscriber: stdout and `{base_dir}/kimchi.log`.
///
/// `RUST_LOG` overrides `level`. Returns `false` when a subscriber was
/// already installed (e.g. by a test), in which case nothing changes.
pub fn init(base_dir: &Path, level: &str) -> Result<bool> {
    let file = OpenOptions::new().create(true).append(true).open(base_dir.join(LOG_FILE))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stdout.and(Arc::new(file)))
        .try_init()
        .is_ok();
    Ok(installed)
}
