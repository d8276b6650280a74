//! picosense CLI Module
//! Command-line interface for operating a device directory

pub mod formatter;

use crate::engine::updater::{Channel, DeviceLayout};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "picosense-cli")]
#[command(author = "picosense Team")]
#[command(version)]
#[command(about = "Inspect and update picosense sensor firmware", long_about = None)]
pub struct Cli {
    /// Device root directory (defaults to the local data dir)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Firmware update management
    Update {
        #[command(subcommand)]
        action: UpdateAction,
    },

    /// Show the firmware files an update would install
    Manifest,

    /// Reinstall the firmware branch as it is now, skipping the release check
    Recover,

    /// Backup management
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Device configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum UpdateAction {
    /// Check the configured channel for a newer version
    Check,

    /// Check, download and install now (no restart)
    Run,

    /// Show installed version, staged files and backups
    Status,
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// List backed-up files
    List,

    /// Restore every backed-up file over the live one
    Restore,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Switch the release channel
    Channel {
        /// stable or prerelease
        channel: Channel,
    },
}

impl Cli {
    pub fn get_root(&self) -> PathBuf {
        self.root
            .clone()
            .or_else(|| DeviceLayout::default_root().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
