#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use kimchi::{logging, Kimchi, KimchiConfig};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "kimchi", version, about = "Run a voting mix network end to end in one process")]
struct Cli {
    /// TOML harness config; `KIMCHI_*` variables still apply on top
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for server data dirs and kimchi.log (default: a temp dir)
    #[arg(long)]
    base_dir: Option<PathBuf>,
    /// First port; servers get base_port+1 upwards
    #[arg(long)]
    base_port: Option<u16>,
    /// Harness log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => KimchiConfig::load_from_file(path)?.with_env_overrides()?,
        None => KimchiConfig::from_env()?,
    };
    if let Some(dir) = cli.base_dir {
        cfg.base_dir = Some(dir);
    }
    if let Some(port) = cli.base_port {
        cfg.base_port = port;
    }
    if let Some(level) = cli.log_level {
        cfg.log_level = level;
    }

    let harness = Kimchi::new(cfg)?;
    logging::init(harness.base_dir(), &harness.config().log_level)?;
    info!(base_dir = %harness.base_dir().display(), "kimchi starting");

    match harness.run().await {
        Ok(summary) => {
            info!(
                authorities = summary.authorities,
                providers = summary.providers,
                mixes = summary.mixes,
                service = %summary.service.name,
                provider = %summary.service.provider,
                lines = summary.tailed_lines,
                "run complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "run failed");
            Err(e.into())
        }
    }
}
