//! picosense - device entry point
//!
//! Loads the device configuration, serves the update/status endpoints and
//! runs scheduled updates from the same single-threaded loop.

use anyhow::{Context, Result};
use clap::Parser;
use picosense_lib::engine::{
    config::Config,
    server,
    updater::{restart::ProcessRestart, DeviceLayout, ReqwestClient, UpdateScheduler},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// How often the loop checks whether a scheduled update is due
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "picosense", version, about = "picosense sensor firmware")]
struct Args {
    /// Device root directory (defaults to the local data dir)
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    picosense_lib::init_tracing("info");
    let args = Args::parse();

    let root = match args.root {
        Some(root) => root,
        None => DeviceLayout::default_root()?,
    };
    let config = Config::load(&root)
        .with_context(|| format!("loading config from {}", root.display()))?;

    let layout = DeviceLayout::new(root, &config.storage);
    layout.init()?;

    info!(
        "picosense v{} starting (firmware {}, channel {})",
        env!("CARGO_PKG_VERSION"),
        layout.current_version(),
        config.ota.channel
    );

    let client = ReqwestClient::new(config.ota.request_timeout())?;
    let scheduler = UpdateScheduler::new(&config, layout, client, Box::new(ProcessRestart));

    server::run(&config.server, Arc::new(Mutex::new(scheduler)), POLL_INTERVAL).await?;
    Ok(())
}
